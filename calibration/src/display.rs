use charuco_calib_common::{
    calibration::CharucoView, detection::draw_corners, Captures,
};
use opencv::{core, highgui, imgproc, prelude::*};

pub const WINDOW: &str = "out";
pub const ESC: u8 = 27;

const REVIEW_SIZE: core::Size = core::Size {
    width: 1280,
    height: 960,
};

/// Low byte of a `wait_key` result.
pub fn key(code: i32) -> u8 {
    (code & 0xff) as u8
}

pub fn put_lines(image: &mut Mat, lines: &[&str], scale: f64, first_y: i32) -> opencv::Result<()> {
    let step = (35. * scale) as i32;
    for (i, line) in lines.iter().enumerate() {
        imgproc::put_text(
            image,
            line,
            core::Point::new(10, first_y + step * i as i32),
            imgproc::FONT_HERSHEY_SIMPLEX,
            scale,
            core::Scalar::new(255.0, 0.0, 0.0, 0.0),
            2,
            imgproc::LINE_8,
            false,
        )?;
    }
    Ok(())
}

/// Shows a resized, annotated copy and blocks for a key. `false` on ESC.
pub fn review(image: &Mat, lines: &[&str]) -> opencv::Result<bool> {
    let mut resized = Mat::default();
    imgproc::resize(
        image,
        &mut resized,
        REVIEW_SIZE,
        0.,
        0.,
        imgproc::INTER_LINEAR,
    )?;
    put_lines(&mut resized, lines, 1.0, 30)?;

    highgui::imshow(WINDOW, &resized)?;
    Ok(key(highgui::wait_key(0)?) != ESC)
}

/// Redraws every calibrated view with its interpolated corners.
pub fn review_corners(captures: &Captures, views: &[CharucoView]) -> opencv::Result<()> {
    for view in views {
        let Some(frame) = captures.frames().get(view.frame) else {
            continue;
        };

        let mut draw = frame.image.clone();
        draw_corners(&mut draw, &view.corners, &view.ids)?;

        let lines = [
            "Did the edges get straight?",
            "Press any key to go to next image.",
            "Press ESC to exit",
        ];
        if !review(&draw, &lines)? {
            break;
        }
    }
    Ok(())
}
