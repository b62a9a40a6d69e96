use crate::display::{self, ESC};
use anyhow::{anyhow, Result};
use charuco_calib_common::{source::read_image_list, Captures, FrameDetector, InputSource};
use opencv::{highgui, imgcodecs, prelude::*};
use std::path::Path;

const STREAM_HINT: &str = "Press 'c' to add current frame. 'ESC' to finish and calibrate";

/// Interactive capture from a camera or a video file.
pub fn from_stream(detector: &FrameDetector, source: &InputSource) -> Result<Captures> {
    println!("Connecting to {source}");
    let mut cap = source
        .open_capture()?
        .ok_or_else(|| anyhow!("{source} is not a stream"))?;

    highgui::named_window(display::WINDOW, highgui::WINDOW_AUTOSIZE)?;

    let mut captures = Captures::new();
    let mut frame = Mat::default();
    let mut draw = Mat::default();

    loop {
        if !cap.read(&mut frame)? || frame.size()?.width < 1 {
            log::info!("end of stream");
            break;
        }

        let found = detector.detect(&frame)?;

        frame.copy_to(&mut draw)?;
        found.draw(&mut draw)?;
        display::put_lines(&mut draw, &[STREAM_HINT], 0.5, 20)?;

        highgui::imshow(display::WINDOW, &draw)?;
        match display::key(highgui::wait_key(source.wait_time())?) {
            ESC => break,
            b'c' if found.has_markers() => {
                if captures.push(frame.clone(), found)? {
                    println!("Frame captured");
                }
            }
            b'c' => println!("No markers in frame, not captured"),
            _ => (),
        }
    }

    log::info!("captured {} frames", captures.len());
    Ok(captures)
}

/// Reads every image of an image list. In test mode each detection is shown
/// instead of being kept.
pub fn from_image_list(detector: &FrameDetector, list: &Path, test: bool) -> Result<Captures> {
    println!("Reading from image list {}", list.display());
    let images = read_image_list(list)?;

    let mut captures = Captures::new();
    for name in images {
        let image = imgcodecs::imread(&name.to_string_lossy(), imgcodecs::IMREAD_COLOR)?;
        if image.size()?.width < 1 {
            log::warn!("could not read {}, skipping", name.display());
            continue;
        }

        let found = detector.detect(&image)?;
        println!(
            "Using image {} found {} aruco tags",
            name.display(),
            found.marker_ids.len()
        );

        if test {
            let mut draw = image.clone();
            found.draw(&mut draw)?;

            let title = name.to_string_lossy();
            let lines = [
                &*title,
                "Did your aruco markers get detected?",
                "Press any key to go to next image.",
                "Press ESC to stop this test",
            ];
            if !display::review(&draw, &lines)? {
                break;
            }
        } else if !captures.push(image, found)? {
            log::warn!("no markers in {}, skipping", name.display());
        }
    }

    Ok(captures)
}
