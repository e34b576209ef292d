use std::sync::Arc;

use crate::SkeletonData;

#[derive(Clone, Debug)]
pub struct Bone {
    pub rotation: f32,
    pub x: f32,
    pub y: f32,
    pub scale_x: f32,
    pub scale_y: f32,
}

#[derive(Clone, Debug)]
pub struct Slot {
    pub bone: usize,
    pub attachment: Option<String>,
    pub color: [f32; 4],
    /// Epoch tag compared against `AnimationState::unkeyed_state`; never reset
    /// per frame, the state's counter outruns it instead.
    pub(crate) attachment_state: i32,
}

/// A posable instance of a [`SkeletonData`]. Holds only the properties the
/// mixer writes; world transforms and rendering live with the host.
#[derive(Clone, Debug)]
pub struct Skeleton {
    pub data: Arc<SkeletonData>,
    pub bones: Vec<Bone>,
    pub slots: Vec<Slot>,
    /// Slot indexes in draw order.
    pub draw_order: Vec<usize>,
}

impl Skeleton {
    pub fn new(data: Arc<SkeletonData>) -> Self {
        let bones = data
            .bones
            .iter()
            .map(|b| Bone {
                rotation: b.rotation,
                x: b.x,
                y: b.y,
                scale_x: b.scale_x,
                scale_y: b.scale_y,
            })
            .collect();
        let slots = data
            .slots
            .iter()
            .map(|s| Slot {
                bone: s.bone,
                attachment: s.attachment.clone(),
                color: s.color,
                attachment_state: 0,
            })
            .collect();
        let draw_order = (0..data.slots.len()).collect();
        Self {
            data,
            bones,
            slots,
            draw_order,
        }
    }

    /// Restores bones, slots and draw order to the setup pose.
    pub fn set_to_setup_pose(&mut self) {
        for (i, bone) in self.bones.iter_mut().enumerate() {
            let Some(data) = self.data.bones.get(i) else {
                continue;
            };
            bone.rotation = data.rotation;
            bone.x = data.x;
            bone.y = data.y;
            bone.scale_x = data.scale_x;
            bone.scale_y = data.scale_y;
        }
        for (i, slot) in self.slots.iter_mut().enumerate() {
            let Some(data) = self.data.slots.get(i) else {
                continue;
            };
            slot.attachment = data.attachment.clone();
            slot.color = data.color;
        }
        self.draw_order.clear();
        self.draw_order.extend(0..self.slots.len());
    }
}
