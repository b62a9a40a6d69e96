//! ArUco detector parameter overrides read from an OpenCV `FileStorage` file.

use crate::{Error, Result};
use opencv::{
    core::{self, FileNode, FileStorage},
    objdetect::DetectorParameters,
    prelude::*,
};
use std::path::Path;

/// Every field left as `None` keeps OpenCV's default.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DetectorConfig {
    pub adaptive_thresh_win_size_min: Option<i32>,
    pub adaptive_thresh_win_size_max: Option<i32>,
    pub adaptive_thresh_win_size_step: Option<i32>,
    pub adaptive_thresh_constant: Option<f64>,
    pub min_marker_perimeter_rate: Option<f64>,
    pub max_marker_perimeter_rate: Option<f64>,
    pub polygonal_approx_accuracy_rate: Option<f64>,
    pub min_corner_distance_rate: Option<f64>,
    pub min_distance_to_border: Option<i32>,
    pub min_marker_distance_rate: Option<f64>,
    pub corner_refinement_method: Option<i32>,
    pub corner_refinement_win_size: Option<i32>,
    pub corner_refinement_max_iterations: Option<i32>,
    pub corner_refinement_min_accuracy: Option<f64>,
    pub marker_border_bits: Option<i32>,
    pub perspective_remove_pixel_per_cell: Option<i32>,
    pub perspective_remove_ignored_margin_per_cell: Option<f64>,
    pub max_erroneous_bits_in_border_rate: Option<f64>,
    pub min_otsu_std_dev: Option<f64>,
    pub error_correction_rate: Option<f64>,
}

fn node(fs: &FileStorage, key: &str) -> opencv::Result<Option<FileNode>> {
    let n = fs.get(key)?;
    Ok(if n.is_none()? { None } else { Some(n) })
}

fn int(fs: &FileStorage, key: &str) -> opencv::Result<Option<i32>> {
    node(fs, key)?.map(|n| n.to_i32()).transpose()
}

fn real(fs: &FileStorage, key: &str) -> opencv::Result<Option<f64>> {
    node(fs, key)?.map(|n| n.real()).transpose()
}

impl DetectorConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let invalid = || Error::InvalidDetectorParameters(path.to_path_buf());

        let filename = path.to_str().ok_or_else(invalid)?;
        let mut fs = FileStorage::new(filename, core::FileStorage_READ, "").map_err(|_| invalid())?;
        if !fs.is_opened()? {
            return Err(invalid());
        }

        let config = Self::read(&fs).map_err(|_| invalid())?;
        fs.release()?;

        log::debug!("loaded detector parameters from {}: {config:?}", path.display());
        Ok(config)
    }

    fn read(fs: &FileStorage) -> opencv::Result<Self> {
        Ok(Self {
            adaptive_thresh_win_size_min: int(fs, "adaptiveThreshWinSizeMin")?,
            adaptive_thresh_win_size_max: int(fs, "adaptiveThreshWinSizeMax")?,
            adaptive_thresh_win_size_step: int(fs, "adaptiveThreshWinSizeStep")?,
            adaptive_thresh_constant: real(fs, "adaptiveThreshConstant")?,
            min_marker_perimeter_rate: real(fs, "minMarkerPerimeterRate")?,
            max_marker_perimeter_rate: real(fs, "maxMarkerPerimeterRate")?,
            polygonal_approx_accuracy_rate: real(fs, "polygonalApproxAccuracyRate")?,
            min_corner_distance_rate: real(fs, "minCornerDistanceRate")?,
            min_distance_to_border: int(fs, "minDistanceToBorder")?,
            min_marker_distance_rate: real(fs, "minMarkerDistanceRate")?,
            corner_refinement_method: int(fs, "cornerRefinementMethod")?,
            corner_refinement_win_size: int(fs, "cornerRefinementWinSize")?,
            corner_refinement_max_iterations: int(fs, "cornerRefinementMaxIterations")?,
            corner_refinement_min_accuracy: real(fs, "cornerRefinementMinAccuracy")?,
            marker_border_bits: int(fs, "markerBorderBits")?,
            perspective_remove_pixel_per_cell: int(fs, "perspectiveRemovePixelPerCell")?,
            perspective_remove_ignored_margin_per_cell: real(
                fs,
                "perspectiveRemoveIgnoredMarginPerCell",
            )?,
            max_erroneous_bits_in_border_rate: real(fs, "maxErroneousBitsInBorderRate")?,
            min_otsu_std_dev: real(fs, "minOtsuStdDev")?,
            error_correction_rate: real(fs, "errorCorrectionRate")?,
        })
    }

    pub fn to_parameters(&self) -> opencv::Result<DetectorParameters> {
        let mut p = DetectorParameters::default()?;

        macro_rules! apply {
            ($($field:ident => $setter:ident),* $(,)?) => {
                $(if let Some(v) = self.$field {
                    p.$setter(v);
                })*
            };
        }

        apply!(
            adaptive_thresh_win_size_min => set_adaptive_thresh_win_size_min,
            adaptive_thresh_win_size_max => set_adaptive_thresh_win_size_max,
            adaptive_thresh_win_size_step => set_adaptive_thresh_win_size_step,
            adaptive_thresh_constant => set_adaptive_thresh_constant,
            min_marker_perimeter_rate => set_min_marker_perimeter_rate,
            max_marker_perimeter_rate => set_max_marker_perimeter_rate,
            polygonal_approx_accuracy_rate => set_polygonal_approx_accuracy_rate,
            min_corner_distance_rate => set_min_corner_distance_rate,
            min_distance_to_border => set_min_distance_to_border,
            min_marker_distance_rate => set_min_marker_distance_rate,
            corner_refinement_method => set_corner_refinement_method,
            corner_refinement_win_size => set_corner_refinement_win_size,
            corner_refinement_max_iterations => set_corner_refinement_max_iterations,
            corner_refinement_min_accuracy => set_corner_refinement_min_accuracy,
            marker_border_bits => set_marker_border_bits,
            perspective_remove_pixel_per_cell => set_perspective_remove_pixel_per_cell,
            perspective_remove_ignored_margin_per_cell => set_perspective_remove_ignored_margin_per_cell,
            max_erroneous_bits_in_border_rate => set_max_erroneous_bits_in_border_rate,
            min_otsu_std_dev => set_min_otsu_std_dev,
            error_correction_rate => set_error_correction_rate,
        );

        Ok(p)
    }
}
