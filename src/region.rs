//! Damage geometry.
//!
//! [`Rect`] is an axis-aligned integer box with exclusive right/bottom
//! edges. [`Region`] is a set of non-overlapping rects kept sorted by
//! `(y1, x1)`, and [`OutputTransform`] maps output-local logical
//! coordinates into device (mode) coordinates.

/// An axis-aligned rectangle; `x2`/`y2` are exclusive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Rect {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl Rect {
    pub const fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn from_size(x: i32, y: i32, width: u32, height: u32) -> Self {
        let width = i32::try_from(width).unwrap_or(i32::MAX);
        let height = i32::try_from(height).unwrap_or(i32::MAX);
        Self {
            x1: x,
            y1: y,
            x2: x.saturating_add(width),
            y2: y.saturating_add(height),
        }
    }

    pub fn width(&self) -> u32 {
        (i64::from(self.x2) - i64::from(self.x1)).max(0) as u32
    }

    pub fn height(&self) -> u32 {
        (i64::from(self.y2) - i64::from(self.y1)).max(0) as u32
    }

    pub fn is_empty(&self) -> bool {
        self.x1 >= self.x2 || self.y1 >= self.y2
    }

    /// Number of pixels covered.
    pub fn area(&self) -> u64 {
        u64::from(self.width()) * u64::from(self.height())
    }

    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let clipped = Rect {
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
            x2: self.x2.min(other.x2),
            y2: self.y2.min(other.y2),
        };
        (!clipped.is_empty()).then_some(clipped)
    }

    pub fn translate(&self, dx: i32, dy: i32) -> Rect {
        Rect {
            x1: self.x1.saturating_add(dx),
            y1: self.y1.saturating_add(dy),
            x2: self.x2.saturating_add(dx),
            y2: self.y2.saturating_add(dy),
        }
    }

    /// Clip to `[0, width) x [0, height)`, returning `None` when nothing is
    /// left.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Rect> {
        self.intersect(&Rect::from_size(0, 0, width, height))
    }

    /// Push the parts of `self` not covered by `other` into `out`.
    fn subtract_into(&self, other: &Rect, out: &mut Vec<Rect>) {
        let Some(overlap) = self.intersect(other) else {
            out.push(*self);
            return;
        };

        if self.y1 < overlap.y1 {
            out.push(Rect::new(self.x1, self.y1, self.x2, overlap.y1));
        }
        if self.x1 < overlap.x1 {
            out.push(Rect::new(self.x1, overlap.y1, overlap.x1, overlap.y2));
        }
        if overlap.x2 < self.x2 {
            out.push(Rect::new(overlap.x2, overlap.y1, self.x2, overlap.y2));
        }
        if overlap.y2 < self.y2 {
            out.push(Rect::new(self.x1, overlap.y2, self.x2, self.y2));
        }
    }
}

/// A set of non-overlapping rectangles.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Region {
    rects: Vec<Rect>,
}

impl Region {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rect(rect: Rect) -> Self {
        let mut region = Self::new();
        region.union_rect(rect);
        region
    }

    pub fn from_rects<I>(rects: I) -> Self
    where
        I: IntoIterator<Item = Rect>,
    {
        let mut region = Self::new();
        for rect in rects {
            region.union_rect(rect);
        }
        region
    }

    pub fn rects(&self) -> &[Rect] {
        &self.rects
    }

    pub fn len(&self) -> usize {
        self.rects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    /// Total number of pixels covered.
    pub fn area(&self) -> u64 {
        self.rects.iter().map(Rect::area).sum()
    }

    /// Bounding box of the region.
    pub fn extents(&self) -> Option<Rect> {
        let first = *self.rects.first()?;
        Some(self.rects[1..].iter().fold(first, |acc, rect| Rect {
            x1: acc.x1.min(rect.x1),
            y1: acc.y1.min(rect.y1),
            x2: acc.x2.max(rect.x2),
            y2: acc.y2.max(rect.y2),
        }))
    }

    /// Add `rect`, keeping only the pieces not already covered.
    pub fn union_rect(&mut self, rect: Rect) {
        if rect.is_empty() {
            return;
        }

        let mut pieces = vec![rect];
        for existing in &self.rects {
            let mut remaining = Vec::with_capacity(pieces.len());
            for piece in &pieces {
                piece.subtract_into(existing, &mut remaining);
            }
            if remaining.is_empty() {
                return;
            }
            pieces = remaining;
        }

        self.rects.extend(pieces);
        self.sort();
    }

    pub fn intersect_rect(&self, rect: &Rect) -> Region {
        let mut rects: Vec<Rect> = self
            .rects
            .iter()
            .filter_map(|existing| existing.intersect(rect))
            .collect();
        sort_rects(&mut rects);
        Region { rects }
    }

    pub fn intersect(&self, other: &Region) -> Region {
        // Both inputs are disjoint, so the pairwise intersections are too.
        let mut rects = Vec::new();
        for a in &self.rects {
            for b in &other.rects {
                if let Some(overlap) = a.intersect(b) {
                    rects.push(overlap);
                }
            }
        }
        sort_rects(&mut rects);
        Region { rects }
    }

    pub fn translate(&self, dx: i32, dy: i32) -> Region {
        Region {
            rects: self.rects.iter().map(|rect| rect.translate(dx, dy)).collect(),
        }
    }

    /// Map every rectangle from logical output coordinates (`width` x
    /// `height`) through `transform` and `scale` into device coordinates.
    pub fn transformed(
        &self,
        width: i32,
        height: i32,
        transform: OutputTransform,
        scale: i32,
    ) -> Region {
        if transform == OutputTransform::Normal && scale == 1 {
            return self.clone();
        }

        let mut rects: Vec<Rect> = self
            .rects
            .iter()
            .map(|rect| transform.transform_rect(width, height, scale, *rect))
            .filter(|rect| !rect.is_empty())
            .collect();
        sort_rects(&mut rects);
        Region { rects }
    }

    fn sort(&mut self) {
        sort_rects(&mut self.rects);
    }
}

fn sort_rects(rects: &mut [Rect]) {
    rects.sort_unstable_by(|a, b| a.y1.cmp(&b.y1).then_with(|| a.x1.cmp(&b.x1)));
}

/// Rotation/flip applied to output contents, in `wl_output.transform`
/// order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum OutputTransform {
    #[default]
    Normal,
    Rotate90,
    Rotate180,
    Rotate270,
    Flipped,
    Flipped90,
    Flipped180,
    Flipped270,
}

impl OutputTransform {
    pub const ALL: [OutputTransform; 8] = [
        Self::Normal,
        Self::Rotate90,
        Self::Rotate180,
        Self::Rotate270,
        Self::Flipped,
        Self::Flipped90,
        Self::Flipped180,
        Self::Flipped270,
    ];

    /// Decode a `wl_output.transform` protocol value.
    pub fn from_wl(value: u32) -> Option<Self> {
        Self::ALL.get(usize::try_from(value).ok()?).copied()
    }

    /// Whether the transform exchanges the width and height axes.
    pub fn swaps_axes(self) -> bool {
        matches!(
            self,
            Self::Rotate90 | Self::Rotate270 | Self::Flipped90 | Self::Flipped270
        )
    }

    pub fn transform_point(
        self,
        width: i32,
        height: i32,
        scale: i32,
        x: i32,
        y: i32,
    ) -> (i32, i32) {
        let (bx, by) = match self {
            Self::Normal => (x, y),
            Self::Flipped => (width - x, y),
            Self::Rotate90 => (height - y, x),
            Self::Flipped90 => (height - y, width - x),
            Self::Rotate180 => (width - x, height - y),
            Self::Flipped180 => (x, height - y),
            Self::Rotate270 => (y, width - x),
            Self::Flipped270 => (y, x),
        };
        (bx.saturating_mul(scale), by.saturating_mul(scale))
    }

    pub fn transform_rect(self, width: i32, height: i32, scale: i32, rect: Rect) -> Rect {
        let (ax, ay) = self.transform_point(width, height, scale, rect.x1, rect.y1);
        let (bx, by) = self.transform_point(width, height, scale, rect.x2, rect.y2);
        Rect {
            x1: ax.min(bx),
            y1: ay.min(by),
            x2: ax.max(bx),
            y2: ay.max(by),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_disjoint(region: &Region) {
        let rects = region.rects();
        for (i, a) in rects.iter().enumerate() {
            for b in &rects[i + 1..] {
                assert!(a.intersect(b).is_none(), "{a:?} overlaps {b:?}");
            }
        }
    }

    #[test]
    fn union_of_overlapping_rects_stays_disjoint_and_keeps_area() {
        let region = Region::from_rects([
            Rect::new(0, 0, 10, 10),
            Rect::new(5, 5, 15, 15),
            Rect::new(2, 2, 4, 4),
        ]);
        assert_disjoint(&region);
        assert_eq!(region.area(), 100 + 100 - 25);
        assert_eq!(region.extents(), Some(Rect::new(0, 0, 15, 15)));
    }

    #[test]
    fn rects_are_sorted_by_row_then_column() {
        let region = Region::from_rects([
            Rect::new(50, 20, 60, 30),
            Rect::new(0, 20, 10, 30),
            Rect::new(5, 0, 8, 3),
        ]);
        let origins: Vec<(i32, i32)> = region.rects().iter().map(|r| (r.x1, r.y1)).collect();
        assert_eq!(origins, vec![(5, 0), (0, 20), (50, 20)]);
    }

    #[test]
    fn empty_rects_are_ignored() {
        let region = Region::from_rects([Rect::new(3, 3, 3, 10), Rect::new(5, 9, 1, 2)]);
        assert!(region.is_empty());
        assert_eq!(region.extents(), None);
    }

    #[test]
    fn intersect_clips_to_other_region() {
        let output = Region::from_rect(Rect::new(100, 0, 200, 100));
        let damage = Region::from_rects([Rect::new(90, 10, 110, 20), Rect::new(0, 0, 50, 50)]);
        let clipped = output.intersect(&damage);
        assert_eq!(clipped.rects(), &[Rect::new(100, 10, 110, 20)]);
        assert_eq!(
            clipped.translate(-100, 0).rects(),
            &[Rect::new(0, 10, 10, 20)]
        );
    }

    #[test]
    fn normal_unscaled_transform_is_identity() {
        let region = Region::from_rect(Rect::new(10, 5, 20, 15));
        assert_eq!(region.transformed(100, 50, OutputTransform::Normal, 1), region);
    }

    #[test]
    fn rotations_and_flips_map_corners() {
        let rect = Rect::new(10, 5, 20, 15);
        let cases = [
            (OutputTransform::Flipped, Rect::new(80, 5, 90, 15)),
            (OutputTransform::Rotate90, Rect::new(35, 10, 45, 20)),
            (OutputTransform::Rotate180, Rect::new(80, 35, 90, 45)),
            (OutputTransform::Rotate270, Rect::new(5, 80, 15, 90)),
            (OutputTransform::Flipped90, Rect::new(35, 80, 45, 90)),
            (OutputTransform::Flipped180, Rect::new(10, 35, 20, 45)),
            (OutputTransform::Flipped270, Rect::new(5, 10, 15, 20)),
        ];
        for (transform, expected) in cases {
            assert_eq!(
                transform.transform_rect(100, 50, 1, rect),
                expected,
                "{transform:?}"
            );
        }
    }

    #[test]
    fn scale_multiplies_device_coordinates() {
        let region = Region::from_rect(Rect::new(10, 5, 20, 15));
        let scaled = region.transformed(100, 50, OutputTransform::Normal, 2);
        assert_eq!(scaled.rects(), &[Rect::new(20, 10, 40, 30)]);
    }

    #[test]
    fn transformed_region_stays_disjoint() {
        let region = Region::from_rects([
            Rect::new(0, 0, 30, 10),
            Rect::new(0, 10, 10, 40),
            Rect::new(20, 20, 60, 50),
        ]);
        for transform in OutputTransform::ALL {
            let mapped = region.transformed(60, 50, transform, 2);
            assert_disjoint(&mapped);
            assert_eq!(mapped.area(), region.area() * 4, "{transform:?}");
        }
    }

    #[test]
    fn clamp_drops_rects_outside_bounds() {
        assert_eq!(
            Rect::new(-5, 90, 10, 120).clamp_to(100, 100),
            Some(Rect::new(0, 90, 10, 100))
        );
        assert_eq!(Rect::new(100, 0, 120, 10).clamp_to(100, 100), None);
    }

    #[test]
    fn decodes_protocol_transform_values() {
        assert_eq!(OutputTransform::from_wl(1), Some(OutputTransform::Rotate90));
        assert_eq!(OutputTransform::from_wl(7), Some(OutputTransform::Flipped270));
        assert_eq!(OutputTransform::from_wl(8), None);
        assert!(OutputTransform::Flipped90.swaps_axes());
        assert!(!OutputTransform::Flipped180.swaps_axes());
    }
}
