use crate::{Error, Result};
use opencv::{
    core::{self, FileStorage},
    prelude::*,
    videoio::{self, VideoCapture},
};
use std::{
    fmt::Display,
    path::{Path, PathBuf},
};

/// Where frames come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    Camera(i32),
    Video(PathBuf),
    ImageList(PathBuf),
}

impl InputSource {
    pub fn select(
        video: Option<PathBuf>,
        image_list: Option<PathBuf>,
        camera_id: i32,
    ) -> Result<Self> {
        match (video, image_list) {
            (Some(_), Some(_)) => Err(Error::ConflictingInputs),
            (Some(v), None) => Ok(Self::Video(v)),
            (None, Some(l)) => Ok(Self::ImageList(l)),
            (None, None) => Ok(Self::Camera(camera_id)),
        }
    }

    /// Delay passed to `wait_key` between streamed frames; 0 blocks until a key.
    pub fn wait_time(&self) -> i32 {
        match self {
            Self::Camera(_) => 10,
            Self::Video(_) | Self::ImageList(_) => 0,
        }
    }

    /// Opens the camera or video. `None` for image lists.
    pub fn open_capture(&self) -> Result<Option<VideoCapture>> {
        let cap = match self {
            Self::Camera(id) => VideoCapture::new(*id, videoio::CAP_ANY)?,
            Self::Video(path) => {
                VideoCapture::from_file(&path.to_string_lossy(), videoio::CAP_ANY)?
            }
            Self::ImageList(_) => return Ok(None),
        };

        if !cap.is_opened()? {
            return Err(Error::CannotOpenSource(self.to_string()));
        }

        Ok(Some(cap))
    }
}

impl Display for InputSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Camera(id) => write!(f, "cam nr {id}"),
            Self::Video(p) => write!(f, "video file {}", p.display()),
            Self::ImageList(p) => write!(f, "image list {}", p.display()),
        }
    }
}

/// Reads a `FileStorage` document whose first top-level node is a sequence of
/// image file names.
pub fn read_image_list(path: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let path = path.as_ref();
    let invalid = |reason| Error::InvalidImageList {
        path: path.to_path_buf(),
        reason,
    };

    let filename = path.to_str().ok_or_else(|| invalid("path is not UTF-8"))?;
    let mut fs = FileStorage::new(filename, core::FileStorage_READ, "")
        .map_err(|_| invalid("cannot be parsed"))?;
    if !fs.is_opened()? {
        return Err(invalid("cannot be opened"));
    }

    let n = fs.get_first_top_level_node()?;
    if !n.is_seq()? {
        return Err(invalid("first node is not a sequence"));
    }

    let dir = path.parent().filter(|d| !d.as_os_str().is_empty());

    let mut list = Vec::with_capacity(n.size()?);
    for i in 0..n.size()? {
        let entry = n.at(i as i32)?;
        if !entry.is_string()? {
            log::warn!("entry {i} of {} is not a file name, skipping", path.display());
            continue;
        }
        list.push(resolve(dir, PathBuf::from(entry.to_string()?)));
    }

    fs.release()?;
    Ok(list)
}

fn resolve(dir: Option<&Path>, name: PathBuf) -> PathBuf {
    match dir {
        Some(d) if name.is_relative() => {
            let joined = d.join(&name);
            if joined.exists() {
                joined
            } else {
                name
            }
        }
        _ => name,
    }
}
