//! Depth sampling and pixel-to-camera projection.

use vhub_models::{Detection, Position3D};

use crate::frame::{DepthImage, Intrinsics};

/// Depth in millimeters at a pixel.
///
/// Returns `None` outside the buffer and for zero readings, which depth
/// cameras use for "no data".
pub fn sample_depth_mm(depth: &DepthImage, x: i32, y: i32) -> Option<f32> {
    if x < 0 || y < 0 {
        return None;
    }
    let (x, y) = (x as u32, y as u32);
    if x >= depth.width() || y >= depth.height() {
        return None;
    }
    match depth.get_pixel(x, y).0[0] {
        0 => None,
        mm => Some(mm as f32),
    }
}

/// Deproject a pixel at a given depth into camera-frame meters.
///
/// Without usable intrinsics the origin is returned.
pub fn project_pixel_to_point(
    px: i32,
    py: i32,
    depth_mm: f32,
    intrinsics: Option<&Intrinsics>,
) -> Position3D {
    let Some(k) = intrinsics.filter(|k| k.is_usable()) else {
        return Position3D::ORIGIN;
    };
    let z = depth_mm as f64 / 1000.0;
    let x = (px as f64 - k.ppx) * z / k.fx;
    let y = (py as f64 - k.ppy) * z / k.fy;
    Position3D::new(x, y, z)
}

/// Attach depth at each detection's bbox center. Returns how many got depth.
pub fn attach_depth(detections: &mut [Detection], depth: &DepthImage) -> usize {
    let mut attached = 0;
    for detection in detections.iter_mut() {
        let (cx, cy) = detection.center();
        if let Some(mm) = sample_depth_mm(depth, cx, cy) {
            detection.depth_mm = Some(mm);
            attached += 1;
        }
    }
    attached
}

/// Project every detection that has depth into camera space.
pub fn attach_positions(detections: &mut [Detection], intrinsics: Option<&Intrinsics>) {
    for detection in detections.iter_mut() {
        if let Some(mm) = detection.depth_mm {
            let (cx, cy) = detection.center();
            detection.position_3d = Some(project_pixel_to_point(cx, cy, mm, intrinsics));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use vhub_models::ClassifierType;

    fn depth_with(x: u32, y: u32, mm: u16) -> DepthImage {
        let mut depth = DepthImage::new(640, 480);
        depth.put_pixel(x, y, Luma([mm]));
        depth
    }

    #[test]
    fn test_projection_at_principal_point() {
        let k = Intrinsics::new(500.0, 500.0, 320.0, 240.0);
        let p = project_pixel_to_point(320, 240, 2000.0, Some(&k));
        assert_eq!(p, Position3D::new(0.0, 0.0, 2.0));
    }

    #[test]
    fn test_projection_off_center() {
        let k = Intrinsics::new(500.0, 500.0, 320.0, 240.0);
        let p = project_pixel_to_point(420, 140, 1000.0, Some(&k));
        assert!((p.x - 0.2).abs() < 1e-9);
        assert!((p.y + 0.2).abs() < 1e-9);
        assert!((p.z - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_projection_without_intrinsics_is_origin() {
        assert_eq!(
            project_pixel_to_point(10, 10, 1500.0, None),
            Position3D::ORIGIN
        );
        let zero = Intrinsics::new(0.0, 0.0, 320.0, 240.0);
        assert_eq!(
            project_pixel_to_point(10, 10, 1500.0, Some(&zero)),
            Position3D::ORIGIN
        );
    }

    #[test]
    fn test_sample_depth_bounds_and_zero() {
        let depth = depth_with(5, 5, 1200);
        assert_eq!(sample_depth_mm(&depth, 5, 5), Some(1200.0));
        assert_eq!(sample_depth_mm(&depth, 6, 5), None);
        assert_eq!(sample_depth_mm(&depth, -1, 5), None);
        assert_eq!(sample_depth_mm(&depth, 640, 5), None);
    }

    #[test]
    fn test_attach_depth_and_positions() {
        let depth = depth_with(320, 240, 2000);
        let mut dets = vec![
            Detection::new([300, 220, 340, 260], 0.9, 0, "person", ClassifierType::Person)
                .unwrap(),
            Detection::new([0, 0, 10, 10], 0.9, 0, "person", ClassifierType::Person).unwrap(),
        ];
        assert_eq!(attach_depth(&mut dets, &depth), 1);
        assert_eq!(dets[0].depth_mm, Some(2000.0));
        assert_eq!(dets[1].depth_mm, None);

        let k = Intrinsics::new(500.0, 500.0, 320.0, 240.0);
        attach_positions(&mut dets, Some(&k));
        assert_eq!(dets[0].position_3d, Some(Position3D::new(0.0, 0.0, 2.0)));
        assert_eq!(dets[1].position_3d, None);
    }
}
