/// A single detector output, in original image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub class_id: u32,
    pub confidence: f32,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl Detection {
    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.) * (self.y2 - self.y1).max(0.)
    }

    pub fn intersection(&self, other: &Detection) -> f32 {
        let w = self.x2.min(other.x2) - self.x1.max(other.x1);
        let h = self.y2.min(other.y2) - self.y1.max(other.y1);
        w.max(0.) * h.max(0.)
    }

    pub fn iou(&self, other: &Detection) -> f32 {
        let union = self.area() + other.area() - self.intersection(other);
        if union <= 0. {
            return 0.;
        }
        self.intersection(other) / union
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundingBoxWithLabels {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub class_label: String,
    pub red: u32,
    pub green: u32,
    pub blue: u32,
    pub confidence: f32,
}
