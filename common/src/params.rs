use crate::{CalibrationFlags, Error, Result};
use opencv::{
    core::{self, FileNode, FileStorage, Mat},
    prelude::*,
};
use std::path::Path;

/// Pose of the board in one calibration view.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Extrinsics {
    /// Rodrigues rotation vector
    pub rotation: [f64; 3],
    pub translation: [f64; 3],
}

impl Extrinsics {
    pub fn from_mats(rvec: &Mat, tvec: &Mat) -> opencv::Result<Self> {
        let mut rotation = [0.; 3];
        let mut translation = [0.; 3];
        for i in 0..3 {
            rotation[i] = *rvec.at::<f64>(i as i32)?;
            translation[i] = *tvec.at::<f64>(i as i32)?;
        }
        Ok(Self {
            rotation,
            translation,
        })
    }

    fn to_row(self) -> [f64; 6] {
        let [a, b, c] = self.rotation;
        let [d, e, f] = self.translation;
        [a, b, c, d, e, f]
    }

    fn from_row(row: &[f64]) -> Option<Self> {
        match row {
            &[a, b, c, d, e, f] => Some(Self {
                rotation: [a, b, c],
                translation: [d, e, f],
            }),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct CameraCalibration {
    pub image_size: core::Size,
    pub flags: CalibrationFlags,
    /// f64 | 3x3
    pub camera_matrix: Mat,
    /// f64 | 4, 5, 8, 12 or 14
    pub dist_coeffs: Mat,
    pub extrinsics: Vec<Extrinsics>,
    pub reprojection_error: f64,
    pub marker_reprojection_error: f64,
}

impl CameraCalibration {
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let cannot_save = || Error::CannotSave(path.to_path_buf());

        let filename = path.to_str().ok_or_else(cannot_save)?;
        let mut fs =
            FileStorage::new(filename, core::FileStorage_WRITE, "").map_err(|_| cannot_save())?;
        if !fs.is_opened()? {
            return Err(cannot_save());
        }

        let time = chrono::Local::now().format("%c").to_string();
        fs.write_str("calibration_time", &time)?;

        fs.write_i32("nframes", self.extrinsics.len() as i32)?;
        fs.write_i32("image_width", self.image_size.width)?;
        fs.write_i32("image_height", self.image_size.height)?;

        if let Some(ratio) = self.flags.aspect_ratio {
            fs.write_f64("aspectRatio", ratio as f64)?;
        }
        if let Some(summary) = self.flags.summary() {
            fs.write_comment(&summary, false)?;
        }
        fs.write_i32("flags", self.flags.bits())?;

        fs.write_mat("camera_matrix", &self.camera_matrix)?;
        fs.write_mat("distortion_coefficients", &self.dist_coeffs)?;

        fs.write_f64("avg_reprojection_error", self.reprojection_error)?;
        fs.write_f64(
            "avg_marker_reprojection_error",
            self.marker_reprojection_error,
        )?;

        if !self.extrinsics.is_empty() {
            let rows: Vec<[f64; 6]> = self.extrinsics.iter().map(|e| e.to_row()).collect();
            fs.write_comment(
                "a set of 6-tuples (rotation vector + translation vector) for each view",
                false,
            )?;
            fs.write_mat("extrinsic_parameters", &Mat::from_slice_2d(&rows)?)?;
        }

        fs.release()?;
        log::debug!("wrote camera parameters to {}", path.display());
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let cannot_read = || Error::CannotReadParameters(path.to_path_buf());

        let filename = path.to_str().ok_or_else(cannot_read)?;
        let mut fs =
            FileStorage::new(filename, core::FileStorage_READ, "").map_err(|_| cannot_read())?;
        if !fs.is_opened()? {
            return Err(cannot_read());
        }

        let required = |key: &'static str| -> Result<FileNode> {
            let n = fs.get(key)?;
            if n.is_none()? {
                return Err(Error::InvalidParameterFile {
                    path: path.to_path_buf(),
                    key,
                });
            }
            Ok(n)
        };

        let image_size = core::Size::new(
            required("image_width")?.to_i32()?,
            required("image_height")?.to_i32()?,
        );
        let bits = required("flags")?.to_i32()?;
        let camera_matrix = required("camera_matrix")?.mat()?;
        let dist_coeffs = required("distortion_coefficients")?.mat()?;
        let reprojection_error = required("avg_reprojection_error")?.real()?;

        let aspect_ratio = fs.get("aspectRatio")?;
        let aspect_ratio = if aspect_ratio.is_none()? {
            1.
        } else {
            aspect_ratio.real()? as f32
        };

        let marker_error = fs.get("avg_marker_reprojection_error")?;
        let marker_reprojection_error = if marker_error.is_none()? {
            f64::NAN
        } else {
            marker_error.real()?
        };

        let extrinsic_node = fs.get("extrinsic_parameters")?;
        let extrinsics = if extrinsic_node.is_none()? {
            vec![]
        } else {
            extrinsic_node
                .mat()?
                .to_vec_2d::<f64>()?
                .iter()
                .filter_map(|row| Extrinsics::from_row(row))
                .collect()
        };

        fs.release()?;

        Ok(Self {
            image_size,
            flags: CalibrationFlags::from_bits(bits, aspect_ratio),
            camera_matrix,
            dist_coeffs,
            extrinsics,
            reprojection_error,
            marker_reprojection_error,
        })
    }
}
