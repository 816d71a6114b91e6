#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Orientation {
    Axial,
    Coronal,
    Sagittal,
}

impl Orientation {
    pub const ALL: [Orientation; 3] = [
        Orientation::Axial,
        Orientation::Coronal,
        Orientation::Sagittal,
    ];

    /// Position of this orientation in per-view arrays.
    pub const fn index(self) -> usize {
        match self {
            Orientation::Axial => 0,
            Orientation::Coronal => 1,
            Orientation::Sagittal => 2,
        }
    }

    /// The two orientations that are not `self`.
    pub const fn others(self) -> [Orientation; 2] {
        match self {
            Orientation::Axial => [Orientation::Coronal, Orientation::Sagittal],
            Orientation::Coronal => [Orientation::Axial, Orientation::Sagittal],
            Orientation::Sagittal => [Orientation::Axial, Orientation::Coronal],
        }
    }

    /// Volume axis the slice index runs along (0 = x, 1 = y, 2 = z).
    pub const fn depth_axis(self) -> usize {
        match self {
            Orientation::Axial => 2,
            Orientation::Coronal => 1,
            Orientation::Sagittal => 0,
        }
    }

    /// Volume axes shown as (width, height) in the plane.
    pub const fn plane_axes(self) -> (usize, usize) {
        match self {
            Orientation::Axial => (0, 1),
            Orientation::Coronal => (0, 2),
            Orientation::Sagittal => (1, 2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Interpolation {
    Bilinear,
    #[default]
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScrollDirection {
    #[default]
    Forward,
    Backward,
}

impl ScrollDirection {
    pub const fn sign(self) -> i64 {
        match self {
            ScrollDirection::Forward => 1,
            ScrollDirection::Backward => -1,
        }
    }

    /// Wheel convention: negative delta (wheel up) scrolls forward.
    pub fn from_wheel(delta_y: f32) -> Self {
        if delta_y < 0.0 {
            ScrollDirection::Forward
        } else {
            ScrollDirection::Backward
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wheel_up_scrolls_forward() {
        assert_eq!(ScrollDirection::from_wheel(-120.0), ScrollDirection::Forward);
        assert_eq!(ScrollDirection::from_wheel(53.0), ScrollDirection::Backward);
        assert_eq!(ScrollDirection::from_wheel(-1.0).sign(), 1);
    }
}
