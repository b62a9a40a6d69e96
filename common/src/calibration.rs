use crate::{
    board::{charuco_object_points, marker_correspondences},
    params::{CameraCalibration, Extrinsics},
    BoardSpec, Error, FrameDetection, FrameDetector, Result,
};
use opencv::{
    calib3d,
    core::{self, Mat, TermCriteria},
    prelude::*,
    types,
};

/// Frames needed before the marker-only phase runs.
pub const MIN_CAPTURES: usize = 1;
/// Views with interpolated corners needed before the ChArUco phase runs.
pub const MIN_CHARUCO_VIEWS: usize = 4;

/// Constraints applied to both calibration phases.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CalibrationFlags {
    /// Fixed fx/fy ratio
    pub aspect_ratio: Option<f32>,
    pub zero_tangent_dist: bool,
    pub fix_principal_point: bool,
}

impl CalibrationFlags {
    pub fn bits(&self) -> i32 {
        let mut bits = 0;
        if self.aspect_ratio.is_some() {
            bits |= calib3d::CALIB_FIX_ASPECT_RATIO;
        }
        if self.zero_tangent_dist {
            bits |= calib3d::CALIB_ZERO_TANGENT_DIST;
        }
        if self.fix_principal_point {
            bits |= calib3d::CALIB_FIX_PRINCIPAL_POINT;
        }
        bits
    }

    pub fn from_bits(bits: i32, aspect_ratio: f32) -> Self {
        Self {
            aspect_ratio: (bits & calib3d::CALIB_FIX_ASPECT_RATIO != 0).then_some(aspect_ratio),
            zero_tangent_dist: bits & calib3d::CALIB_ZERO_TANGENT_DIST != 0,
            fix_principal_point: bits & calib3d::CALIB_FIX_PRINCIPAL_POINT != 0,
        }
    }

    /// e.g. `flags: +fix_aspectRatio+zero_tangent_dist`, `None` without flags
    pub fn summary(&self) -> Option<String> {
        let bits = self.bits();
        if bits == 0 {
            return None;
        }

        let names = [
            (calib3d::CALIB_USE_INTRINSIC_GUESS, "+use_intrinsic_guess"),
            (calib3d::CALIB_FIX_ASPECT_RATIO, "+fix_aspectRatio"),
            (calib3d::CALIB_FIX_PRINCIPAL_POINT, "+fix_principal_point"),
            (calib3d::CALIB_ZERO_TANGENT_DIST, "+zero_tangent_dist"),
        ];

        let mut s = String::from("flags: ");
        for (bit, name) in names {
            if bits & bit != 0 {
                s.push_str(name);
            }
        }
        Some(s)
    }

    /// Identity with `fx` set to the aspect ratio when it is fixed, empty otherwise.
    pub fn initial_camera_matrix(&self) -> opencv::Result<Mat> {
        match self.aspect_ratio {
            Some(ratio) => {
                let mut m = Mat::eye(3, 3, core::CV_64F)?.to_mat()?;
                *m.at_2d_mut::<f64>(0, 0)? = ratio as f64;
                Ok(m)
            }
            None => Ok(Mat::default()),
        }
    }
}

/// A frame kept for calibration together with its marker detections.
pub struct CapturedFrame {
    pub image: Mat,
    pub marker_corners: types::VectorOfVectorOfPoint2f,
    pub marker_ids: types::VectorOfi32,
}

#[derive(Default)]
pub struct Captures {
    frames: Vec<CapturedFrame>,
    image_size: core::Size,
}

impl Captures {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps the frame if any marker was found in it.
    pub fn push(&mut self, image: Mat, detection: FrameDetection) -> opencv::Result<bool> {
        if !detection.has_markers() {
            return Ok(false);
        }

        self.image_size = image.size()?;
        self.frames.push(CapturedFrame {
            image,
            marker_corners: detection.marker_corners,
            marker_ids: detection.marker_ids,
        });
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn image_size(&self) -> core::Size {
        self.image_size
    }

    pub fn frames(&self) -> &[CapturedFrame] {
        &self.frames
    }
}

/// ChArUco corners of one captured frame after the second interpolation pass.
pub struct CharucoView {
    /// Index into [`Captures::frames`]
    pub frame: usize,
    pub corners: types::VectorOfPoint2f,
    pub ids: types::VectorOfi32,
}

pub fn check_captures(found: usize) -> Result<()> {
    if found < MIN_CAPTURES {
        return Err(Error::NotEnoughCaptures {
            found,
            required: MIN_CAPTURES,
        });
    }
    Ok(())
}

pub fn check_views(found: usize) -> Result<()> {
    if found < MIN_CHARUCO_VIEWS {
        return Err(Error::NotEnoughCorners {
            found,
            required: MIN_CHARUCO_VIEWS,
        });
    }
    Ok(())
}

/// The released-object method needs the same object points in every view,
/// so the fixed point is only used when all views saw the same corner ids.
pub fn fixed_point_index<'a>(
    spec: &BoardSpec,
    mut views: impl Iterator<Item = &'a types::VectorOfi32>,
) -> i32 {
    let Some(first) = views.next() else {
        return -1;
    };
    let first = first.to_vec();
    let fixed = spec.fixed_point();

    let usable = fixed > 0
        && (fixed as usize) + 1 < first.len()
        && views.all(|ids| ids.to_vec() == first);

    if usable {
        fixed
    } else {
        -1
    }
}

fn criteria() -> opencv::Result<TermCriteria> {
    TermCriteria::new(
        core::TermCriteria_COUNT + core::TermCriteria_EPS,
        30,
        f64::EPSILON,
    )
}

/// Marker-only calibration over all captured frames. Returns the reprojection error.
pub fn calibrate_markers(
    detector: &FrameDetector,
    captures: &Captures,
    flags: &CalibrationFlags,
    camera_matrix: &mut Mat,
    dist_coeffs: &mut Mat,
) -> Result<f64> {
    let mut object_points = types::VectorOfVectorOfPoint3f::new();
    let mut image_points = types::VectorOfVectorOfPoint2f::new();

    for frame in captures.frames() {
        let (object, image) =
            marker_correspondences(detector.board(), &frame.marker_corners, &frame.marker_ids)?;
        if object.is_empty() {
            continue;
        }
        object_points.push(object);
        image_points.push(image);
    }
    check_captures(object_points.len())?;

    let err = calib3d::calibrate_camera(
        &object_points,
        &image_points,
        captures.image_size(),
        camera_matrix,
        dist_coeffs,
        &mut core::no_array(),
        &mut core::no_array(),
        flags.bits(),
        criteria()?,
    )?;

    Ok(err)
}

/// Second pass: interpolate every frame with the marker-only camera model and
/// keep the views that produced corners.
pub fn interpolate_views(
    detector: &FrameDetector,
    captures: &Captures,
    camera_matrix: &Mat,
    dist_coeffs: &Mat,
) -> Result<Vec<CharucoView>> {
    let mut views = Vec::with_capacity(captures.len());

    for (i, frame) in captures.frames().iter().enumerate() {
        let (corners, ids) = detector.interpolate(
            &frame.image,
            &frame.marker_corners,
            &frame.marker_ids,
            camera_matrix,
            dist_coeffs,
        )?;

        if ids.is_empty() {
            log::warn!("no corners interpolated in frame {i}, dropping it");
            continue;
        }

        views.push(CharucoView {
            frame: i,
            corners,
            ids,
        });
    }

    Ok(views)
}

pub struct CharucoSolution {
    pub reprojection_error: f64,
    pub extrinsics: Vec<Extrinsics>,
}

/// Bundle adjustment over the interpolated corners of every view.
pub fn calibrate_charuco(
    detector: &FrameDetector,
    spec: &BoardSpec,
    views: &[CharucoView],
    image_size: core::Size,
    flags: &CalibrationFlags,
    camera_matrix: &mut Mat,
    dist_coeffs: &mut Mat,
) -> Result<CharucoSolution> {
    check_views(views.len())?;

    let mut object_points = types::VectorOfVectorOfPoint3f::new();
    let mut image_points = types::VectorOfVectorOfPoint2f::new();
    for view in views {
        object_points.push(charuco_object_points(detector.board(), &view.ids)?);
        image_points.push(view.corners.clone());
    }

    let fixed_point = fixed_point_index(spec, views.iter().map(|v| &v.ids));
    if fixed_point < 0 {
        log::info!("views observe different corners, calibrating without a fixed point");
    } else {
        log::debug!("releasing object points around corner {fixed_point}");
    }

    let mut rvecs = types::VectorOfMat::new();
    let mut tvecs = types::VectorOfMat::new();

    let reprojection_error = calib3d::calibrate_camera_ro(
        &object_points,
        &image_points,
        image_size,
        fixed_point,
        camera_matrix,
        dist_coeffs,
        &mut rvecs,
        &mut tvecs,
        &mut core::no_array(),
        flags.bits(),
        criteria()?,
    )?;

    let extrinsics = rvecs
        .iter()
        .zip(tvecs.iter())
        .map(|(r, t)| Extrinsics::from_mats(&r, &t))
        .collect::<opencv::Result<_>>()?;

    Ok(CharucoSolution {
        reprojection_error,
        extrinsics,
    })
}

/// Both phases end to end. Also returns the views used by the second phase.
pub fn calibrate(
    detector: &FrameDetector,
    spec: &BoardSpec,
    captures: &Captures,
    flags: &CalibrationFlags,
) -> Result<(CameraCalibration, Vec<CharucoView>)> {
    check_captures(captures.len())?;

    let mut camera_matrix = flags.initial_camera_matrix()?;
    let mut dist_coeffs = Mat::default();

    let marker_error =
        calibrate_markers(detector, captures, flags, &mut camera_matrix, &mut dist_coeffs)?;
    log::info!("marker-only reprojection error: {marker_error:.4}");

    let views = interpolate_views(detector, captures, &camera_matrix, &dist_coeffs)?;
    log::info!("{} of {} frames have corners", views.len(), captures.len());

    let solution = calibrate_charuco(
        detector,
        spec,
        &views,
        captures.image_size(),
        flags,
        &mut camera_matrix,
        &mut dist_coeffs,
    )?;

    Ok((
        CameraCalibration {
            image_size: captures.image_size(),
            flags: *flags,
            camera_matrix,
            dist_coeffs,
            extrinsics: solution.extrinsics,
            reprojection_error: solution.reprojection_error,
            marker_reprojection_error: marker_error,
        },
        views,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DetectorConfig, Dictionary};
    use opencv::imgproc;

    const BOARD_SIZE: core::Size = core::Size {
        width: 500,
        height: 700,
    };
    const VIEW_SIZE: core::Size = core::Size {
        width: 900,
        height: 1000,
    };

    /// Where the board's corners land in each synthetic view.
    const QUADS: [[(f32, f32); 4]; 6] = [
        [(150., 100.), (650., 130.), (630., 830.), (170., 800.)],
        [(120., 150.), (600., 100.), (640., 850.), (100., 780.)],
        [(200., 120.), (680., 160.), (660., 880.), (180., 840.)],
        [(100., 100.), (560., 140.), (580., 860.), (120., 900.)],
        [(220., 80.), (700., 120.), (720., 900.), (200., 860.)],
        [(160., 140.), (640., 90.), (620., 800.), (140., 860.)],
    ];

    fn spec() -> BoardSpec {
        BoardSpec {
            squares_x: 5,
            squares_y: 7,
            square_length: 0.04,
            marker_length: 0.02,
            dictionary: Dictionary::Dict4x4_50,
        }
    }

    #[test]
    fn flags_map_to_opencv_bits() {
        assert_eq!(CalibrationFlags::default().bits(), 0);

        let flags = CalibrationFlags {
            aspect_ratio: Some(1.5),
            zero_tangent_dist: true,
            fix_principal_point: false,
        };
        assert_eq!(
            flags.bits(),
            calib3d::CALIB_FIX_ASPECT_RATIO | calib3d::CALIB_ZERO_TANGENT_DIST
        );
        assert_eq!(CalibrationFlags::from_bits(flags.bits(), 1.5), flags);
    }

    #[test]
    fn summary_lists_active_flags_in_order() {
        assert_eq!(CalibrationFlags::default().summary(), None);

        let flags = CalibrationFlags {
            aspect_ratio: Some(1.),
            zero_tangent_dist: true,
            fix_principal_point: true,
        };
        assert_eq!(
            flags.summary().unwrap(),
            "flags: +fix_aspectRatio+fix_principal_point+zero_tangent_dist"
        );
    }

    #[test]
    fn fixed_aspect_seeds_the_camera_matrix() {
        let flags = CalibrationFlags {
            aspect_ratio: Some(1.25),
            ..Default::default()
        };
        let m = flags.initial_camera_matrix().unwrap();
        assert_eq!(*m.at_2d::<f64>(0, 0).unwrap(), 1.25);
        assert_eq!(*m.at_2d::<f64>(1, 1).unwrap(), 1.);

        let none = CalibrationFlags::default().initial_camera_matrix().unwrap();
        assert_eq!(none.rows(), 0);
    }

    #[test]
    fn frame_gates() {
        assert!(matches!(
            check_captures(0),
            Err(Error::NotEnoughCaptures { found: 0, required: 1 })
        ));
        assert!(check_captures(1).is_ok());

        assert!(matches!(
            check_views(3),
            Err(Error::NotEnoughCorners { found: 3, required: 4 })
        ));
        assert!(check_views(4).is_ok());
    }

    #[test]
    fn fixed_point_needs_identical_views() {
        let all = types::VectorOfi32::from_iter(0..24);
        let partial = types::VectorOfi32::from_iter(0..12);

        assert_eq!(fixed_point_index(&spec(), [&all, &all].into_iter()), 3);
        assert_eq!(fixed_point_index(&spec(), [&all, &partial].into_iter()), -1);
        assert_eq!(fixed_point_index(&spec(), std::iter::empty()), -1);

        let tiny = types::VectorOfi32::from_iter(0..3);
        assert_eq!(fixed_point_index(&spec(), [&tiny].into_iter()), -1);
    }

    #[test]
    fn empty_captures_are_rejected() {
        let spec = spec();
        let detector = FrameDetector::new(&spec, &DetectorConfig::default(), false).unwrap();

        let r = calibrate(&detector, &spec, &Captures::new(), &CalibrationFlags::default());
        assert!(matches!(r, Err(Error::NotEnoughCaptures { .. })));
    }

    #[test]
    fn frames_without_markers_are_not_kept() {
        let mut captures = Captures::new();
        let detection = FrameDetection {
            marker_corners: types::VectorOfVectorOfPoint2f::new(),
            marker_ids: types::VectorOfi32::new(),
            charuco_corners: types::VectorOfPoint2f::new(),
            charuco_ids: types::VectorOfi32::new(),
        };

        assert!(!captures.push(Mat::default(), detection).unwrap());
        assert!(captures.is_empty());
    }

    fn points(quad: [(f32, f32); 4]) -> types::VectorOfPoint2f {
        types::VectorOfPoint2f::from_iter(quad.map(|(x, y)| core::Point2f::new(x, y)))
    }

    fn synthetic_captures(detector: &FrameDetector, quads: &[[(f32, f32); 4]]) -> Captures {
        let mut board = Mat::default();
        detector
            .board()
            .generate_image(BOARD_SIZE, &mut board, 20, 1)
            .unwrap();

        let (w, h) = (BOARD_SIZE.width as f32, BOARD_SIZE.height as f32);
        let src = points([(0., 0.), (w, 0.), (w, h), (0., h)]);

        let mut captures = Captures::new();
        for quad in quads {
            let m = imgproc::get_perspective_transform(&src, &points(*quad), core::DECOMP_LU)
                .unwrap();

            let mut view = Mat::default();
            imgproc::warp_perspective(
                &board,
                &mut view,
                &m,
                VIEW_SIZE,
                imgproc::INTER_LINEAR,
                core::BORDER_CONSTANT,
                core::Scalar::all(255.),
            )
            .unwrap();

            let found = detector.detect(&view).unwrap();
            assert!(captures.push(view, found).unwrap());
        }
        captures
    }

    #[test]
    fn synthetic_views_calibrate() {
        let spec = spec();
        let detector = FrameDetector::new(&spec, &DetectorConfig::default(), false).unwrap();

        let captures = synthetic_captures(&detector, &QUADS);
        assert_eq!(captures.len(), QUADS.len());
        assert_eq!(captures.image_size(), VIEW_SIZE);

        let flags = CalibrationFlags {
            aspect_ratio: Some(1.25),
            zero_tangent_dist: true,
            fix_principal_point: false,
        };
        let (calibration, views) = calibrate(&detector, &spec, &captures, &flags).unwrap();

        assert!(views.len() >= MIN_CHARUCO_VIEWS);
        assert!(views.iter().all(|v| !v.ids.is_empty() && v.ids.len() == v.corners.len()));
        assert_eq!(calibration.extrinsics.len(), views.len());
        assert_eq!(calibration.image_size, VIEW_SIZE);
        assert_eq!(calibration.flags, flags);

        assert!(calibration.reprojection_error.is_finite());
        assert!(calibration.marker_reprojection_error.is_finite());
        assert!(calibration
            .extrinsics
            .iter()
            .all(|e| e.rotation.iter().chain(&e.translation).all(|v| v.is_finite())));

        let k = &calibration.camera_matrix;
        assert_eq!((k.rows(), k.cols()), (3, 3));
        let fx = *k.at_2d::<f64>(0, 0).unwrap();
        let fy = *k.at_2d::<f64>(1, 1).unwrap();
        assert!(fx > 0. && fy > 0.);
        assert!((fx / fy - 1.25).abs() < 1e-4, "fx/fy = {}", fx / fy);

        let d = &calibration.dist_coeffs;
        assert_eq!(*d.at::<f64>(2).unwrap(), 0.);
        assert_eq!(*d.at::<f64>(3).unwrap(), 0.);
    }

    #[test]
    fn too_few_views_for_the_charuco_phase() {
        let spec = spec();
        let detector = FrameDetector::new(&spec, &DetectorConfig::default(), false).unwrap();

        let captures = synthetic_captures(&detector, &QUADS[..3]);
        let r = calibrate(&detector, &spec, &captures, &CalibrationFlags::default());
        assert!(matches!(
            r,
            Err(Error::NotEnoughCorners { required: 4, .. })
        ));
    }

    #[test]
    fn marker_phase_runs_on_a_single_view() {
        let spec = spec();
        let detector = FrameDetector::new(&spec, &DetectorConfig::default(), false).unwrap();
        let captures = synthetic_captures(&detector, &QUADS[..1]);

        let mut camera_matrix = Mat::default();
        let mut dist_coeffs = Mat::default();
        let err = calibrate_markers(
            &detector,
            &captures,
            &CalibrationFlags::default(),
            &mut camera_matrix,
            &mut dist_coeffs,
        )
        .unwrap();
        assert!(err.is_finite());
        assert_eq!((camera_matrix.rows(), camera_matrix.cols()), (3, 3));

        let views = interpolate_views(&detector, &captures, &camera_matrix, &dist_coeffs).unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].frame, 0);
    }
}
