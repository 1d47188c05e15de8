//! Skeleton overlay drawn straight into the RGB frame.

use image::{Rgb, RgbImage};
use pose_core::{BodyLandmark, LANDMARK_COUNT, LandmarkSet};

/// Landmarks less visible or less present than this are not drawn.
pub const VISIBILITY_THRESHOLD: f32 = 0.5;
pub const PRESENCE_THRESHOLD: f32 = 0.5;

const BORDER_COLOR: Rgb<u8> = Rgb([224, 224, 224]);

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DrawingStyle {
    pub landmark_color: Rgb<u8>,
    pub connection_color: Rgb<u8>,
    pub thickness: u32,
    pub circle_radius: u32,
}

impl Default for DrawingStyle {
    fn default() -> Self {
        Self {
            landmark_color: Rgb([255, 0, 0]),
            connection_color: Rgb([224, 224, 224]),
            thickness: 2,
            circle_radius: 2,
        }
    }
}

/// Draw `connections` and then every drawable landmark onto `image` in place.
pub fn draw_landmarks(
    image: &mut RgbImage,
    landmarks: &LandmarkSet,
    connections: &[(BodyLandmark, BodyLandmark)],
    style: &DrawingStyle,
) {
    let (width, height) = image.dimensions();
    let mut pixels: [Option<(i32, i32)>; LANDMARK_COUNT] = [None; LANDMARK_COUNT];
    for (joint, landmark) in landmarks.iter() {
        if landmark.visibility < VISIBILITY_THRESHOLD || landmark.presence < PRESENCE_THRESHOLD {
            continue;
        }
        pixels[joint.index()] = landmark.to_pixel(width, height);
    }

    let line_radius = (style.thickness / 2) as i32;
    for (start, end) in connections {
        if let (Some(a), Some(b)) = (pixels[start.index()], pixels[end.index()]) {
            draw_line(image, a, b, line_radius, style.connection_color);
        }
    }

    let radius = style.circle_radius as i32;
    let border = (radius + 1).max((radius as f32 * 1.2) as i32);
    for point in pixels.iter().flatten() {
        fill_circle(image, *point, border, BORDER_COLOR);
        fill_circle(image, *point, radius, style.landmark_color);
    }
}

/// Bresenham line stamped with a disc of `radius` at every step.
fn draw_line(image: &mut RgbImage, from: (i32, i32), to: (i32, i32), radius: i32, color: Rgb<u8>) {
    let (mut x, mut y) = from;
    let dx = (to.0 - x).abs();
    let dy = -(to.1 - y).abs();
    let sx = if x < to.0 { 1 } else { -1 };
    let sy = if y < to.1 { 1 } else { -1 };
    let mut err = dx + dy;
    loop {
        fill_circle(image, (x, y), radius, color);
        if (x, y) == to {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

fn fill_circle(image: &mut RgbImage, center: (i32, i32), radius: i32, color: Rgb<u8>) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    let r2 = radius * radius;
    for dy in -radius..=radius {
        let py = center.1 + dy;
        if py < 0 || py >= height {
            continue;
        }
        for dx in -radius..=radius {
            let px = center.0 + dx;
            if px < 0 || px >= width || dx * dx + dy * dy > r2 {
                continue;
            }
            image.put_pixel(px as u32, py as u32, color);
        }
    }
}
