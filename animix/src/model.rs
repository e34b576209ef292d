use std::collections::HashMap;

// Property flags, packed with the target index into a single id so the mixer
// can test "does another clip key the same thing" with a set lookup.
pub(crate) const PROPERTY_ROTATE: u64 = 1 << 0;
pub(crate) const PROPERTY_X: u64 = 1 << 1;
pub(crate) const PROPERTY_Y: u64 = 1 << 2;
pub(crate) const PROPERTY_SCALE_X: u64 = 1 << 3;
pub(crate) const PROPERTY_SCALE_Y: u64 = 1 << 4;
pub(crate) const PROPERTY_RGB: u64 = 1 << 5;
pub(crate) const PROPERTY_ALPHA: u64 = 1 << 6;
pub(crate) const PROPERTY_ATTACHMENT: u64 = 1 << 7;
pub(crate) const PROPERTY_DRAW_ORDER: u64 = 1 << 8;
pub(crate) const PROPERTY_EVENT: u64 = 1 << 9;

pub(crate) fn property_id(property: u64, target: u32) -> u64 {
    (property << 32) | u64::from(target)
}

/// Setup pose of one bone.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BoneData {
    pub name: String,
    pub rotation: f32,
    pub x: f32,
    pub y: f32,
    pub scale_x: f32,
    pub scale_y: f32,
}

impl BoneData {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rotation: 0.0,
            x: 0.0,
            y: 0.0,
            scale_x: 1.0,
            scale_y: 1.0,
        }
    }
}

/// Setup pose of one slot.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SlotData {
    pub name: String,
    /// Index of the bone this slot is attached to.
    pub bone: usize,
    pub attachment: Option<String>,
    pub color: [f32; 4],
}

impl SlotData {
    pub fn new(name: impl Into<String>, bone: usize) -> Self {
        Self {
            name: name.into(),
            bone,
            attachment: None,
            color: [1.0, 1.0, 1.0, 1.0],
        }
    }
}

/// Interpolation between one keyframe (or keyframe component) and the next.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Curve {
    Linear,
    Stepped,
    Bezier { cx1: f32, cy1: f32, cx2: f32, cy2: f32 },
}

#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RotateFrame {
    pub time: f32,
    /// Rotation offset from the setup pose, in degrees.
    pub angle: f32,
    pub curve: Curve,
}

#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Vec2Frame {
    pub time: f32,
    pub x: f32,
    pub y: f32,
    pub curve: [Curve; 2],
}

#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ColorFrame {
    pub time: f32,
    pub color: [f32; 4],
    pub curve: [Curve; 4],
}

#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AttachmentFrame {
    pub time: f32,
    pub name: Option<String>,
}

#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DrawOrderFrame {
    pub time: f32,
    /// Slot indexes in draw order. `None` keys the setup order.
    pub order: Option<Vec<usize>>,
}

/// An animation-authored marker fired to listeners when playback crosses its
/// keyframe.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Event {
    pub time: f32,
    pub name: String,
    pub int_value: i32,
    pub float_value: f32,
    pub string_value: String,
}

#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RotateTimeline {
    pub bone_index: usize,
    pub frames: Vec<RotateFrame>,
}

#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TranslateTimeline {
    pub bone_index: usize,
    pub frames: Vec<Vec2Frame>,
}

#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScaleTimeline {
    pub bone_index: usize,
    /// Frame values are multipliers against the setup scale.
    pub frames: Vec<Vec2Frame>,
}

#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ColorTimeline {
    pub slot_index: usize,
    pub frames: Vec<ColorFrame>,
}

#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AttachmentTimeline {
    pub slot_index: usize,
    pub frames: Vec<AttachmentFrame>,
}

#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DrawOrderTimeline {
    pub frames: Vec<DrawOrderFrame>,
}

#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EventTimeline {
    pub events: Vec<Event>,
}

/// One animated property stream. Attachment, rotate, draw-order and event
/// timelines are special-cased by the mixer; the rest apply generically.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Timeline {
    Rotate(RotateTimeline),
    Translate(TranslateTimeline),
    Scale(ScaleTimeline),
    Color(ColorTimeline),
    Attachment(AttachmentTimeline),
    DrawOrder(DrawOrderTimeline),
    Event(EventTimeline),
}

impl Timeline {
    /// Ids of the skeleton properties this timeline writes.
    pub fn property_ids(&self) -> Vec<u64> {
        match self {
            Timeline::Rotate(t) => vec![property_id(PROPERTY_ROTATE, t.bone_index as u32)],
            Timeline::Translate(t) => vec![
                property_id(PROPERTY_X, t.bone_index as u32),
                property_id(PROPERTY_Y, t.bone_index as u32),
            ],
            Timeline::Scale(t) => vec![
                property_id(PROPERTY_SCALE_X, t.bone_index as u32),
                property_id(PROPERTY_SCALE_Y, t.bone_index as u32),
            ],
            Timeline::Color(t) => vec![
                property_id(PROPERTY_RGB, t.slot_index as u32),
                property_id(PROPERTY_ALPHA, t.slot_index as u32),
            ],
            Timeline::Attachment(t) => {
                vec![property_id(PROPERTY_ATTACHMENT, t.slot_index as u32)]
            }
            Timeline::DrawOrder(_) => vec![property_id(PROPERTY_DRAW_ORDER, 0)],
            Timeline::Event(_) => vec![property_id(PROPERTY_EVENT, 0)],
        }
    }
}

/// A named, ordered bundle of timelines.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Animation {
    pub name: String,
    pub duration: f32,
    pub timelines: Vec<Timeline>,
}

impl Animation {
    pub fn new(name: impl Into<String>, duration: f32, timelines: Vec<Timeline>) -> Self {
        Self {
            name: name.into(),
            duration,
            timelines,
        }
    }

    /// Whether any timeline of this animation keys one of the given properties.
    pub fn has_property(&self, ids: &[u64]) -> bool {
        if ids.is_empty() {
            return false;
        }
        self.timelines
            .iter()
            .any(|t| t.property_ids().iter().any(|p| ids.contains(p)))
    }

    pub fn event_timeline(&self) -> Option<&EventTimeline> {
        self.timelines.iter().find_map(|t| match t {
            Timeline::Event(e) => Some(e),
            _ => None,
        })
    }
}

/// Setup pose and animation registry shared by every skeleton instance.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SkeletonData {
    pub bones: Vec<BoneData>,
    pub slots: Vec<SlotData>,
    pub animations: Vec<Animation>,
    pub animation_index: HashMap<String, usize>,
}

impl SkeletonData {
    pub fn animation(&self, name: &str) -> Option<(usize, &Animation)> {
        let index = *self.animation_index.get(name)?;
        Some((index, &self.animations[index]))
    }

    /// Appends an animation and records it in the name index.
    pub fn register_animation(&mut self, animation: Animation) -> usize {
        let index = self.animations.len();
        self.animation_index.insert(animation.name.clone(), index);
        self.animations.push(animation);
        index
    }
}
