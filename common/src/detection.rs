use crate::{BoardSpec, DetectorConfig, Result};
use opencv::{
    core,
    objdetect::{
        self, ArucoDetector, Board, CharucoBoard, CharucoDetector, CharucoParameters,
        DetectorParameters, RefineParameters,
    },
    prelude::*,
    types,
};

fn refine_parameters() -> RefineParameters {
    RefineParameters {
        min_rep_distance: 10.,
        error_correction_rate: 3.,
        check_all_orders: true,
    }
}

/// Markers and ChArUco corners found in a single frame.
pub struct FrameDetection {
    pub marker_corners: types::VectorOfVectorOfPoint2f,
    pub marker_ids: types::VectorOfi32,
    pub charuco_corners: types::VectorOfPoint2f,
    pub charuco_ids: types::VectorOfi32,
}

impl FrameDetection {
    pub fn has_markers(&self) -> bool {
        !self.marker_ids.is_empty()
    }

    pub fn has_corners(&self) -> bool {
        !self.charuco_ids.is_empty()
    }

    pub fn draw(&self, image: &mut Mat) -> opencv::Result<()> {
        if self.has_markers() {
            objdetect::draw_detected_markers(
                image,
                &self.marker_corners,
                &self.marker_ids,
                core::Scalar::new(0.0, 255.0, 0.0, 1.0),
            )?;
        }
        draw_corners(image, &self.charuco_corners, &self.charuco_ids)
    }
}

pub fn draw_corners(
    image: &mut Mat,
    corners: &types::VectorOfPoint2f,
    ids: &types::VectorOfi32,
) -> opencv::Result<()> {
    if corners.is_empty() {
        return Ok(());
    }
    objdetect::draw_detected_corners_charuco(
        image,
        corners,
        ids,
        core::Scalar::new(0.0, 0.0, 255.0, 1.0),
    )
}

pub struct FrameDetector {
    board: CharucoBoard,
    parameters: DetectorParameters,
    marker_detector: ArucoDetector,
    charuco_detector: CharucoDetector,
    refind: Option<Board>,
}

impl FrameDetector {
    pub fn new(spec: &BoardSpec, config: &DetectorConfig, refind: bool) -> Result<Self> {
        let board = spec.create()?;
        let parameters = config.to_parameters()?;

        let marker_detector = ArucoDetector::new(
            &spec.dictionary.load()?,
            &parameters,
            refine_parameters(),
        )?;

        let charuco_detector = CharucoDetector::new(
            &board,
            &CharucoParameters::default()?,
            &parameters,
            refine_parameters(),
        )?;

        let refind = if refind {
            Some(Board::from(board.clone()))
        } else {
            None
        };

        Ok(Self {
            board,
            parameters,
            marker_detector,
            charuco_detector,
            refind,
        })
    }

    pub fn board(&self) -> &CharucoBoard {
        &self.board
    }

    pub fn detect(&self, image: &Mat) -> opencv::Result<FrameDetection> {
        let mut marker_corners = types::VectorOfVectorOfPoint2f::new();
        let mut marker_ids = types::VectorOfi32::new();
        let mut rejected = types::VectorOfVectorOfPoint2f::new();

        self.marker_detector.detect_markers(
            image,
            &mut marker_corners,
            &mut marker_ids,
            &mut rejected,
        )?;

        if let Some(board) = &self.refind {
            self.marker_detector.refine_detected_markers(
                image,
                board,
                &mut marker_corners,
                &mut marker_ids,
                &mut rejected,
                &core::no_array(),
                &core::no_array(),
                &mut core::no_array(),
            )?;
        }

        let mut charuco_corners = types::VectorOfPoint2f::new();
        let mut charuco_ids = types::VectorOfi32::new();

        // corners are only interpolated from already found markers
        if !marker_ids.is_empty() {
            self.charuco_detector.detect_board(
                image,
                &mut charuco_corners,
                &mut charuco_ids,
                &mut marker_corners,
                &mut marker_ids,
            )?;
        }

        Ok(FrameDetection {
            marker_corners,
            marker_ids,
            charuco_corners,
            charuco_ids,
        })
    }

    /// Interpolates ChArUco corners from stored markers using a camera model.
    pub fn interpolate(
        &self,
        image: &Mat,
        marker_corners: &types::VectorOfVectorOfPoint2f,
        marker_ids: &types::VectorOfi32,
        camera_matrix: &Mat,
        dist_coeffs: &Mat,
    ) -> opencv::Result<(types::VectorOfPoint2f, types::VectorOfi32)> {
        let mut charuco_parameters = CharucoParameters::default()?;
        charuco_parameters.set_camera_matrix(camera_matrix.clone());
        charuco_parameters.set_dist_coeffs(dist_coeffs.clone());

        let detector = CharucoDetector::new(
            &self.board,
            &charuco_parameters,
            &self.parameters,
            refine_parameters(),
        )?;

        let mut corners = types::VectorOfPoint2f::new();
        let mut ids = types::VectorOfi32::new();
        let (mut marker_corners, mut marker_ids) = (marker_corners.clone(), marker_ids.clone());

        detector.detect_board(
            image,
            &mut corners,
            &mut ids,
            &mut marker_corners,
            &mut marker_ids,
        )?;

        Ok((corners, ids))
    }
}
