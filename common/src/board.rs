use crate::{Error, Result};
use opencv::{
    core::{self, Point2f, Point3f, Vector},
    objdetect::{self, CharucoBoard, PredefinedDictionaryType},
    prelude::*,
};
use std::{fmt::Display, str::FromStr};

/// Predefined ArUco dictionaries, numbered the way OpenCV numbers them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Dictionary {
    Dict4x4_50,
    Dict4x4_100,
    Dict4x4_250,
    Dict4x4_1000,
    Dict5x5_50,
    Dict5x5_100,
    Dict5x5_250,
    Dict5x5_1000,
    Dict6x6_50,
    Dict6x6_100,
    Dict6x6_250,
    Dict6x6_1000,
    Dict7x7_50,
    Dict7x7_100,
    Dict7x7_250,
    Dict7x7_1000,
    ArucoOriginal,
}

impl Dictionary {
    pub const ALL: [Dictionary; 17] = [
        Self::Dict4x4_50,
        Self::Dict4x4_100,
        Self::Dict4x4_250,
        Self::Dict4x4_1000,
        Self::Dict5x5_50,
        Self::Dict5x5_100,
        Self::Dict5x5_250,
        Self::Dict5x5_1000,
        Self::Dict6x6_50,
        Self::Dict6x6_100,
        Self::Dict6x6_250,
        Self::Dict6x6_1000,
        Self::Dict7x7_50,
        Self::Dict7x7_100,
        Self::Dict7x7_250,
        Self::Dict7x7_1000,
        Self::ArucoOriginal,
    ];

    pub fn from_id(id: i32) -> Result<Self> {
        usize::try_from(id)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
            .ok_or_else(|| Error::UnknownDictionary(id.to_string()))
    }

    pub fn id(self) -> i32 {
        Self::ALL.iter().position(|d| *d == self).unwrap_or_default() as i32
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Dict4x4_50 => "DICT_4X4_50",
            Self::Dict4x4_100 => "DICT_4X4_100",
            Self::Dict4x4_250 => "DICT_4X4_250",
            Self::Dict4x4_1000 => "DICT_4X4_1000",
            Self::Dict5x5_50 => "DICT_5X5_50",
            Self::Dict5x5_100 => "DICT_5X5_100",
            Self::Dict5x5_250 => "DICT_5X5_250",
            Self::Dict5x5_1000 => "DICT_5X5_1000",
            Self::Dict6x6_50 => "DICT_6X6_50",
            Self::Dict6x6_100 => "DICT_6X6_100",
            Self::Dict6x6_250 => "DICT_6X6_250",
            Self::Dict6x6_1000 => "DICT_6X6_1000",
            Self::Dict7x7_50 => "DICT_7X7_50",
            Self::Dict7x7_100 => "DICT_7X7_100",
            Self::Dict7x7_250 => "DICT_7X7_250",
            Self::Dict7x7_1000 => "DICT_7X7_1000",
            Self::ArucoOriginal => "DICT_ARUCO_ORIGINAL",
        }
    }

    fn predefined(self) -> PredefinedDictionaryType {
        use PredefinedDictionaryType::*;
        match self {
            Self::Dict4x4_50 => DICT_4X4_50,
            Self::Dict4x4_100 => DICT_4X4_100,
            Self::Dict4x4_250 => DICT_4X4_250,
            Self::Dict4x4_1000 => DICT_4X4_1000,
            Self::Dict5x5_50 => DICT_5X5_50,
            Self::Dict5x5_100 => DICT_5X5_100,
            Self::Dict5x5_250 => DICT_5X5_250,
            Self::Dict5x5_1000 => DICT_5X5_1000,
            Self::Dict6x6_50 => DICT_6X6_50,
            Self::Dict6x6_100 => DICT_6X6_100,
            Self::Dict6x6_250 => DICT_6X6_250,
            Self::Dict6x6_1000 => DICT_6X6_1000,
            Self::Dict7x7_50 => DICT_7X7_50,
            Self::Dict7x7_100 => DICT_7X7_100,
            Self::Dict7x7_250 => DICT_7X7_250,
            Self::Dict7x7_1000 => DICT_7X7_1000,
            Self::ArucoOriginal => DICT_ARUCO_ORIGINAL,
        }
    }

    pub fn load(self) -> opencv::Result<objdetect::Dictionary> {
        objdetect::get_predefined_dictionary(self.predefined())
    }
}

impl Display for Dictionary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name(), self.id())
    }
}

impl FromStr for Dictionary {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Ok(id) = s.parse::<i32>() {
            return Self::from_id(id);
        }

        Self::ALL
            .into_iter()
            .find(|d| d.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::UnknownDictionary(s.to_string()))
    }
}

/// Physical layout of a ChArUco board. Lengths are in metres.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BoardSpec {
    pub squares_x: i32,
    pub squares_y: i32,
    pub square_length: f32,
    pub marker_length: f32,
    pub dictionary: Dictionary,
}

impl BoardSpec {
    pub fn validate(&self) -> Result<()> {
        if self.squares_x < 2 || self.squares_y < 2 {
            return Err(Error::InvalidBoard("need at least 2 squares per side"));
        }
        if self.square_length <= 0. || self.marker_length <= 0. {
            return Err(Error::InvalidBoard("side lengths must be positive"));
        }
        if self.marker_length >= self.square_length {
            return Err(Error::InvalidBoard(
                "marker side must be smaller than square side",
            ));
        }
        Ok(())
    }

    pub fn create(&self) -> Result<CharucoBoard> {
        self.validate()?;

        Ok(CharucoBoard::new(
            core::Size::new(self.squares_x, self.squares_y),
            self.square_length,
            self.marker_length,
            &self.dictionary.load()?,
            &core::no_array(),
        )?)
    }

    /// Corner index held fixed by the released-object calibration.
    pub fn fixed_point(&self) -> i32 {
        self.squares_x - 2
    }
}

/// Board-frame positions of the given ChArUco corner ids.
pub fn charuco_object_points(board: &CharucoBoard, ids: &Vector<i32>) -> Result<Vector<Point3f>> {
    if ids.is_empty() {
        return Err(Error::EmptyView);
    }

    let corners = board.get_chessboard_corners()?;
    let count = corners.len();

    ids.iter()
        .map(|id| match usize::try_from(id) {
            Ok(i) if i < count => Ok(corners.get(i)?),
            _ => Err(Error::CornerIdOutOfRange { id, count }),
        })
        .collect()
}

/// Object/image point pairs for marker-only calibration. Every known marker
/// contributes its four corners; ids that are not on the board are skipped.
pub fn marker_correspondences(
    board: &CharucoBoard,
    corners: &Vector<Vector<Point2f>>,
    ids: &Vector<i32>,
) -> Result<(Vector<Point3f>, Vector<Point2f>)> {
    let board_ids = board.get_ids()?;
    let obj_points = board.get_obj_points()?;

    let mut object = Vector::with_capacity(ids.len() * 4);
    let mut image = Vector::with_capacity(ids.len() * 4);
    for (id, quad) in ids.iter().zip(corners.iter()) {
        let Some(index) = board_ids.iter().position(|b| b == id) else {
            log::debug!("marker {id} is not part of the board");
            continue;
        };

        for p in obj_points.get(index)?.iter() {
            object.push(p);
        }
        for p in quad.iter() {
            image.push(p);
        }
    }

    Ok((object, image))
}

#[cfg(test)]
mod tests {
    use super::*;

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
    fn dictionary_ids_follow_opencv_order() {
        assert_eq!(Dictionary::from_id(0).unwrap(), Dictionary::Dict4x4_50);
        assert_eq!(Dictionary::from_id(10).unwrap(), Dictionary::Dict6x6_250);
        assert_eq!(Dictionary::from_id(16).unwrap(), Dictionary::ArucoOriginal);
        assert!(Dictionary::from_id(17).is_err());
        assert!(Dictionary::from_id(-1).is_err());

        for d in Dictionary::ALL {
            assert_eq!(Dictionary::from_id(d.id()).unwrap(), d);
        }
    }

    #[test]
    fn dictionary_parses_names_and_ids() {
        assert_eq!("3".parse::<Dictionary>().unwrap(), Dictionary::Dict4x4_1000);
        assert_eq!(
            "dict_aruco_original".parse::<Dictionary>().unwrap(),
            Dictionary::ArucoOriginal
        );
        assert!(matches!(
            "DICT_9X9_50".parse::<Dictionary>(),
            Err(Error::UnknownDictionary(_))
        ));
    }

    #[test]
    fn board_geometry_is_validated() {
        assert!(spec().validate().is_ok());

        let narrow = BoardSpec { squares_x: 1, ..spec() };
        assert!(matches!(narrow.validate(), Err(Error::InvalidBoard(_))));

        let big_markers = BoardSpec { marker_length: 0.05, ..spec() };
        assert!(matches!(big_markers.validate(), Err(Error::InvalidBoard(_))));
    }

    #[test]
    fn fixed_point_is_two_from_the_right() {
        assert_eq!(spec().fixed_point(), 3);
    }

    #[test]
    fn corner_ids_map_to_board_points() {
        let spec = spec();
        let board = spec.create().unwrap();

        // (squares_x - 1) * (squares_y - 1) inner corners
        let ids = Vector::from_slice(&[0, 1, 4]);
        let points = charuco_object_points(&board, &ids).unwrap();
        assert_eq!(points.len(), 3);

        let p0 = points.get(0).unwrap();
        let p1 = points.get(1).unwrap();
        let p4 = points.get(2).unwrap();
        assert!((p1.x - p0.x - spec.square_length).abs() < 1e-6);
        assert!((p4.y - p0.y - spec.square_length).abs() < 1e-6);
        assert_eq!(p0.z, 0.);
    }

    #[test]
    fn out_of_range_corner_ids_are_rejected() {
        let board = spec().create().unwrap();

        let ids = Vector::from_slice(&[0, 24]);
        assert!(matches!(
            charuco_object_points(&board, &ids),
            Err(Error::CornerIdOutOfRange { id: 24, count: 24 })
        ));
        assert!(matches!(
            charuco_object_points(&board, &Vector::new()),
            Err(Error::EmptyView)
        ));
    }

    #[test]
    fn markers_expand_to_four_corners() {
        let board = spec().create().unwrap();

        let quad = |x: f32| {
            Vector::from_slice(&[
                Point2f::new(x, 0.),
                Point2f::new(x + 1., 0.),
                Point2f::new(x + 1., 1.),
                Point2f::new(x, 1.),
            ])
        };
        let corners = Vector::from_iter([quad(0.), quad(10.), quad(20.)]);
        // 40 is in the dictionary but not on a 5x7 board
        let ids = Vector::from_slice(&[0, 40, 2]);

        let (object, image) = marker_correspondences(&board, &corners, &ids).unwrap();
        assert_eq!(object.len(), 8);
        assert_eq!(image.len(), 8);
        assert_eq!(image.get(4).unwrap(), Point2f::new(20., 0.));
    }
}
