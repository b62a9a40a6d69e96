mod capture;
mod display;

use anyhow::Result;
use charuco_calib_common::{
    calibration, BoardSpec, CalibrationFlags, DetectorConfig, Dictionary, FrameDetector,
    InputSource,
};
use clap::{ArgAction, Parser};
use std::path::PathBuf;

const ABOUT: &str = "Calibration using a ChArUco board
  To capture a frame for calibration, press 'c',
  If input comes from video, press any key for next frame
  To finish capturing, press 'ESC' key and calibration starts.";

#[derive(Parser, Debug)]
#[command(about = "Calibration using a ChArUco board", long_about = ABOUT, disable_help_flag = true)]
struct Args {
    /// Number of squares in X direction
    #[arg(short = 'w', long = "squares-x")]
    squares_x: i32,

    /// Number of squares in Y direction
    #[arg(short = 'h', long = "squares-y")]
    squares_y: i32,

    /// Square side length (in meters)
    #[arg(long = "square-length", visible_alias = "sl")]
    square_length: f32,

    /// Marker side length (in meters)
    #[arg(long = "marker-length", visible_alias = "ml")]
    marker_length: f32,

    /// Dictionary: DICT_4X4_50=0, DICT_4X4_100=1, DICT_4X4_250=2, DICT_4X4_1000=3,
    /// DICT_5X5_50=4, DICT_5X5_100=5, DICT_5X5_250=6, DICT_5X5_1000=7, DICT_6X6_50=8,
    /// DICT_6X6_100=9, DICT_6X6_250=10, DICT_6X6_1000=11, DICT_7X7_50=12, DICT_7X7_100=13,
    /// DICT_7X7_250=14, DICT_7X7_1000=15, DICT_ARUCO_ORIGINAL=16 (id or name)
    #[arg(short, long)]
    dictionary: Dictionary,

    /// Output file with calibrated camera parameters
    outfile: PathBuf,

    /// Input from video file, if omitted, input comes from camera
    #[arg(short, long)]
    video: Option<PathBuf>,

    /// List of input images
    #[arg(short = 'l', long = "image-list")]
    image_list: Option<PathBuf>,

    /// Camera id if input doesn't come from video or an image list
    #[arg(long = "camera-id", visible_alias = "ci", default_value_t = 0)]
    camera_id: i32,

    /// File of marker detector parameters
    #[arg(long = "detector-params", visible_alias = "dp")]
    detector_params: Option<PathBuf>,

    /// Apply refind strategy
    #[arg(long, visible_alias = "rs")]
    refind: bool,

    /// Assume zero tangential distortion
    #[arg(long = "zero-tangent", visible_alias = "zt")]
    zero_tangent: bool,

    /// Fix aspect ratio (fx/fy) to this value
    #[arg(short, long = "aspect-ratio")]
    aspect_ratio: Option<f32>,

    /// Fix the principal point at the center
    #[arg(long = "fix-principal", visible_alias = "pc")]
    fix_principal: bool,

    /// For an image sequence, show what got detected, don't calculate anything
    #[arg(long)]
    test: bool,

    /// Show detected chessboard corners after calibration
    #[arg(long = "show-corners", visible_alias = "sc")]
    show_corners: bool,

    /// Print help
    #[arg(long, action = ArgAction::Help)]
    help: Option<bool>,
}

impl Args {
    fn board(&self) -> BoardSpec {
        BoardSpec {
            squares_x: self.squares_x,
            squares_y: self.squares_y,
            square_length: self.square_length,
            marker_length: self.marker_length,
            dictionary: self.dictionary,
        }
    }

    fn flags(&self) -> CalibrationFlags {
        CalibrationFlags {
            aspect_ratio: self.aspect_ratio,
            zero_tangent_dist: self.zero_tangent,
            fix_principal_point: self.fix_principal,
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    run(Args::parse())
}

fn run(args: Args) -> Result<()> {
    let spec = args.board();
    spec.validate()?;

    let source = InputSource::select(args.video.clone(), args.image_list.clone(), args.camera_id)?;

    let detector_config = match &args.detector_params {
        Some(path) => DetectorConfig::load(path)?,
        None => DetectorConfig::default(),
    };

    log::info!(
        "board {}x{} squares, {}",
        spec.squares_x,
        spec.squares_y,
        spec.dictionary
    );
    let detector = FrameDetector::new(&spec, &detector_config, args.refind)?;

    let captures = match &source {
        InputSource::ImageList(list) => capture::from_image_list(&detector, list, args.test)?,
        _ => capture::from_stream(&detector, &source)?,
    };

    if args.test {
        println!("Test run finished");
        return Ok(());
    }

    let flags = args.flags();
    let (calibration, views) = calibration::calibrate(&detector, &spec, &captures, &flags)?;

    calibration.save(&args.outfile)?;

    println!("Rep Error: {}", calibration.reprojection_error);
    println!("Rep Error Aruco: {}", calibration.marker_reprojection_error);
    println!("Calibration saved to {}", args.outfile.display());

    if args.show_corners {
        display::review_corners(&captures, &views)?;
    }

    Ok(())
}
