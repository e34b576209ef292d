use crate::{
    AttachmentTimeline, ColorFrame, ColorTimeline, Curve, DrawOrderTimeline, Event, EventTimeline,
    RotateFrame, RotateTimeline, ScaleTimeline, Skeleton, TranslateTimeline, Vec2Frame,
};

const TIME_EPSILON: f32 = 1e-6;

/// How a timeline's value combines with what lower tracks already wrote.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MixBlend {
    /// Use the rig's setup pose as the base.
    Setup,
    /// Track-0-only initial full application.
    First,
    /// Overwrite lower tracks' value.
    Replace,
    /// Sum onto lower tracks' value.
    Add,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MixDirection {
    In,
    Out,
}

// Attachment epoch markers relative to `unkeyed_state`. A slot at
// `unkeyed_state + UNKEYED_SETUP` after a pass gets its setup attachment back.
pub(crate) const UNKEYED_SETUP: i32 = 1;
pub(crate) const UNKEYED_CURRENT: i32 = 2;

fn curve_value(curve: Curve, time: f32, time1: f32, value1: f32, time2: f32, value2: f32) -> f32 {
    match curve {
        Curve::Linear => {
            let t = (time - time1) / (time2 - time1);
            value1 + (value2 - value1) * t
        }
        Curve::Stepped => value1,
        Curve::Bezier { cx1, cy1, cx2, cy2 } => {
            bezier_value(time, time1, value1, cx1, cy1, cx2, cy2, time2, value2)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn bezier_value(
    time: f32,
    time1: f32,
    value1: f32,
    cx1: f32,
    cy1: f32,
    cx2: f32,
    cy2: f32,
    time2: f32,
    value2: f32,
) -> f32 {
    const BEZIER_SIZE: usize = 18;

    let tmpx = (time1 - cx1 * 2.0 + cx2) * 0.03;
    let tmpy = (value1 - cy1 * 2.0 + cy2) * 0.03;
    let dddx = ((cx1 - cx2) * 3.0 - time1 + time2) * 0.006;
    let dddy = ((cy1 - cy2) * 3.0 - value1 + value2) * 0.006;
    let mut ddx = tmpx * 2.0 + dddx;
    let mut ddy = tmpy * 2.0 + dddy;
    let mut dx = (cx1 - time1) * 0.3 + tmpx + dddx * 0.16666667;
    let mut dy = (cy1 - value1) * 0.3 + tmpy + dddy * 0.16666667;

    let mut x = time1 + dx;
    let mut y = value1 + dy;

    let mut points = [0.0f32; BEZIER_SIZE];
    for i in (0..BEZIER_SIZE).step_by(2) {
        points[i] = x;
        points[i + 1] = y;
        dx += ddx;
        dy += ddy;
        ddx += dddx;
        ddy += dddy;
        x += dx;
        y += dy;
    }

    if points[0] > time {
        let denom = points[0] - time1;
        if denom.abs() <= 1.0e-12 {
            return value1;
        }
        return value1 + (time - time1) / denom * (points[1] - value1);
    }

    for i in (2..BEZIER_SIZE).step_by(2) {
        if points[i] >= time {
            let x = points[i - 2];
            let y = points[i - 1];
            let denom = points[i] - x;
            if denom.abs() <= 1.0e-12 {
                return y;
            }
            return y + (time - x) / denom * (points[i + 1] - y);
        }
    }

    let x = points[BEZIER_SIZE - 2];
    let y = points[BEZIER_SIZE - 1];
    let denom = time2 - x;
    if denom.abs() <= 1.0e-12 {
        return y;
    }
    y + (time - x) / denom * (value2 - y)
}

pub(crate) fn sample_rotate(frames: &[RotateFrame], time: f32) -> f32 {
    let index = frames.partition_point(|f| f.time <= time);
    if index == 0 {
        return frames[0].angle;
    }
    if index >= frames.len() {
        return frames[frames.len() - 1].angle;
    }
    let prev = &frames[index - 1];
    let next = &frames[index];
    if (next.time - prev.time).abs() <= 1.0e-12 {
        return next.angle;
    }
    curve_value(prev.curve, time, prev.time, prev.angle, next.time, next.angle)
}

fn sample_vec2(frames: &[Vec2Frame], time: f32) -> (f32, f32) {
    let index = frames.partition_point(|f| f.time <= time);
    if index == 0 {
        return (frames[0].x, frames[0].y);
    }
    if index >= frames.len() {
        let f = &frames[frames.len() - 1];
        return (f.x, f.y);
    }
    let prev = &frames[index - 1];
    let next = &frames[index];
    if (next.time - prev.time).abs() <= 1.0e-12 {
        return (next.x, next.y);
    }
    (
        curve_value(prev.curve[0], time, prev.time, prev.x, next.time, next.x),
        curve_value(prev.curve[1], time, prev.time, prev.y, next.time, next.y),
    )
}

fn sample_color(frames: &[ColorFrame], time: f32) -> [f32; 4] {
    let index = frames.partition_point(|f| f.time <= time);
    if index == 0 {
        return frames[0].color;
    }
    if index >= frames.len() {
        return frames[frames.len() - 1].color;
    }
    let prev = &frames[index - 1];
    let next = &frames[index];
    if (next.time - prev.time).abs() <= 1.0e-12 {
        return next.color;
    }
    let mut out = [0.0; 4];
    for c in 0..4 {
        out[c] = curve_value(
            prev.curve[c],
            time,
            prev.time,
            prev.color[c],
            next.time,
            next.color[c],
        );
    }
    out
}

fn sign(value: f32) -> f32 {
    if value < 0.0 {
        -1.0
    } else if value > 0.0 {
        1.0
    } else {
        0.0
    }
}

pub(crate) fn apply_rotate(
    timeline: &RotateTimeline,
    skeleton: &mut Skeleton,
    time: f32,
    alpha: f32,
    blend: MixBlend,
) {
    let Some(bone) = skeleton.bones.get_mut(timeline.bone_index) else {
        return;
    };
    if timeline.frames.is_empty() {
        return;
    }

    let setup = skeleton
        .data
        .bones
        .get(timeline.bone_index)
        .map(|b| b.rotation)
        .unwrap_or(0.0);

    if time < timeline.frames[0].time {
        match blend {
            MixBlend::Setup => bone.rotation = setup,
            MixBlend::First => bone.rotation += (setup - bone.rotation) * alpha,
            _ => {}
        }
        return;
    }

    let value = sample_rotate(&timeline.frames, time);
    match blend {
        MixBlend::Setup => bone.rotation = setup + value * alpha,
        MixBlend::First | MixBlend::Replace => {
            bone.rotation += (value + setup - bone.rotation) * alpha;
        }
        MixBlend::Add => bone.rotation += value * alpha,
    }
}

/// Blends a bone's rotation toward the keyed value over the numerically
/// shortest arc while staying continuous frame to frame. `state` holds two
/// floats per rotate timeline: the accumulated total rotation and the last
/// raw diff.
#[allow(clippy::too_many_arguments)]
pub(crate) fn apply_rotate_mixed(
    timeline: &RotateTimeline,
    skeleton: &mut Skeleton,
    time: f32,
    alpha: f32,
    blend: MixBlend,
    state: &mut [f32],
    rotate_index: usize,
    first_frame: bool,
) {
    let Some(bone) = skeleton.bones.get_mut(timeline.bone_index) else {
        return;
    };
    if timeline.frames.is_empty() {
        return;
    }

    let base = rotate_index * 2;
    if base + 1 >= state.len() {
        apply_rotate(timeline, skeleton, time, alpha, blend);
        return;
    }

    if first_frame {
        state[base] = 0.0;
    }
    if alpha >= 1.0 {
        apply_rotate(timeline, skeleton, time, 1.0, blend);
        return;
    }

    let setup = skeleton
        .data
        .bones
        .get(timeline.bone_index)
        .map(|b| b.rotation)
        .unwrap_or(0.0);

    let (r1, r2) = if time < timeline.frames[0].time {
        match blend {
            MixBlend::Setup => {
                bone.rotation = setup;
                return;
            }
            MixBlend::First => (bone.rotation, setup),
            _ => return,
        }
    } else {
        let r1 = if blend == MixBlend::Setup {
            setup
        } else {
            bone.rotation
        };
        (r1, setup + sample_rotate(&timeline.frames, time))
    };

    let mut total;
    let mut diff = r2 - r1;
    diff -= ((diff / 360.0 - 0.5).ceil()) * 360.0;

    if diff == 0.0 {
        total = state[base];
    } else {
        let (last_total, last_diff) = if first_frame {
            (0.0, diff)
        } else {
            (state[base], state[base + 1])
        };

        let loops = last_total - (last_total % 360.0);
        total = diff + loops;

        let current = diff >= 0.0;
        let mut dir = last_total >= 0.0;

        // The empirically tuned thresholds below match the authoring tools'
        // expectations; do not re-derive them.
        if last_diff.abs() <= 90.0 && sign(last_diff) != sign(diff) {
            if (last_total - loops).abs() > 180.0 {
                total += 360.0 * sign(last_total);
                dir = current;
            } else if loops != 0.0 {
                total -= 360.0 * sign(last_total);
            } else {
                dir = current;
            }
        }

        if dir != current {
            total += 360.0 * sign(last_total);
        }
    }

    state[base] = total;
    state[base + 1] = diff;

    bone.rotation = r1 + total * alpha;
}

pub(crate) fn apply_translate(
    timeline: &TranslateTimeline,
    skeleton: &mut Skeleton,
    time: f32,
    alpha: f32,
    blend: MixBlend,
) {
    let Some(bone) = skeleton.bones.get_mut(timeline.bone_index) else {
        return;
    };
    if timeline.frames.is_empty() {
        return;
    }

    let setup = skeleton
        .data
        .bones
        .get(timeline.bone_index)
        .map(|b| (b.x, b.y))
        .unwrap_or((0.0, 0.0));

    if time < timeline.frames[0].time {
        match blend {
            MixBlend::Setup => {
                bone.x = setup.0;
                bone.y = setup.1;
            }
            MixBlend::First => {
                bone.x += (setup.0 - bone.x) * alpha;
                bone.y += (setup.1 - bone.y) * alpha;
            }
            _ => {}
        }
        return;
    }

    let (x, y) = sample_vec2(&timeline.frames, time);
    match blend {
        MixBlend::Setup => {
            bone.x = setup.0 + x * alpha;
            bone.y = setup.1 + y * alpha;
        }
        MixBlend::First | MixBlend::Replace => {
            bone.x += (setup.0 + x - bone.x) * alpha;
            bone.y += (setup.1 + y - bone.y) * alpha;
        }
        MixBlend::Add => {
            bone.x += x * alpha;
            bone.y += y * alpha;
        }
    }
}

pub(crate) fn apply_scale(
    timeline: &ScaleTimeline,
    skeleton: &mut Skeleton,
    time: f32,
    alpha: f32,
    blend: MixBlend,
) {
    let Some(bone) = skeleton.bones.get_mut(timeline.bone_index) else {
        return;
    };
    if timeline.frames.is_empty() {
        return;
    }

    let setup = skeleton
        .data
        .bones
        .get(timeline.bone_index)
        .map(|b| (b.scale_x, b.scale_y))
        .unwrap_or((1.0, 1.0));

    if time < timeline.frames[0].time {
        match blend {
            MixBlend::Setup => {
                bone.scale_x = setup.0;
                bone.scale_y = setup.1;
            }
            MixBlend::First => {
                bone.scale_x += (setup.0 - bone.scale_x) * alpha;
                bone.scale_y += (setup.1 - bone.scale_y) * alpha;
            }
            _ => {}
        }
        return;
    }

    let (x, y) = sample_vec2(&timeline.frames, time);
    let target = (x * setup.0, y * setup.1);
    match blend {
        MixBlend::Setup => {
            bone.scale_x = setup.0 + (target.0 - setup.0) * alpha;
            bone.scale_y = setup.1 + (target.1 - setup.1) * alpha;
        }
        MixBlend::First | MixBlend::Replace => {
            bone.scale_x += (target.0 - bone.scale_x) * alpha;
            bone.scale_y += (target.1 - bone.scale_y) * alpha;
        }
        MixBlend::Add => {
            bone.scale_x += (target.0 - setup.0) * alpha;
            bone.scale_y += (target.1 - setup.1) * alpha;
        }
    }
}

pub(crate) fn apply_color(
    timeline: &ColorTimeline,
    skeleton: &mut Skeleton,
    time: f32,
    alpha: f32,
    blend: MixBlend,
) {
    let Some(slot) = skeleton.slots.get_mut(timeline.slot_index) else {
        return;
    };
    if timeline.frames.is_empty() {
        return;
    }

    let setup = skeleton
        .data
        .slots
        .get(timeline.slot_index)
        .map(|s| s.color)
        .unwrap_or([1.0, 1.0, 1.0, 1.0]);

    if time < timeline.frames[0].time {
        match blend {
            MixBlend::Setup => slot.color = setup,
            MixBlend::First => {
                for c in 0..4 {
                    slot.color[c] += (setup[c] - slot.color[c]) * alpha;
                }
            }
            _ => {}
        }
        return;
    }

    let value = sample_color(&timeline.frames, time);
    match blend {
        MixBlend::Setup => {
            for c in 0..4 {
                slot.color[c] = setup[c] + (value[c] - setup[c]) * alpha;
            }
        }
        MixBlend::First | MixBlend::Replace => {
            for c in 0..4 {
                slot.color[c] += (value[c] - slot.color[c]) * alpha;
            }
        }
        MixBlend::Add => {
            for c in 0..4 {
                slot.color[c] += (value[c] - setup[c]) * alpha;
            }
        }
    }
}

pub(crate) fn apply_attachment(
    timeline: &AttachmentTimeline,
    skeleton: &mut Skeleton,
    time: f32,
    blend: MixBlend,
    attachments: bool,
    unkeyed_state: i32,
) {
    if timeline.frames.is_empty() {
        return;
    }

    if time < timeline.frames[0].time {
        if matches!(blend, MixBlend::Setup | MixBlend::First) {
            let setup = skeleton
                .data
                .slots
                .get(timeline.slot_index)
                .and_then(|s| s.attachment.clone());
            set_attachment(skeleton, timeline.slot_index, setup, attachments, unkeyed_state);
        }
    } else {
        let frame_index = timeline
            .frames
            .partition_point(|f| f.time <= time)
            .saturating_sub(1);
        set_attachment(
            skeleton,
            timeline.slot_index,
            timeline.frames[frame_index].name.clone(),
            attachments,
            unkeyed_state,
        );
    }

    // If no attachment was set (before the first frame, or attachments is
    // false), the setup attachment is restored at the end of the pass.
    if let Some(slot) = skeleton.slots.get_mut(timeline.slot_index) {
        if slot.attachment_state <= unkeyed_state {
            slot.attachment_state = unkeyed_state + UNKEYED_SETUP;
        }
    }
}

fn set_attachment(
    skeleton: &mut Skeleton,
    slot_index: usize,
    name: Option<String>,
    attachments: bool,
    unkeyed_state: i32,
) {
    let Some(slot) = skeleton.slots.get_mut(slot_index) else {
        return;
    };
    slot.attachment = name;
    if attachments {
        slot.attachment_state = unkeyed_state + UNKEYED_CURRENT;
    }
}

pub(crate) fn apply_draw_order(
    timeline: &DrawOrderTimeline,
    skeleton: &mut Skeleton,
    time: f32,
    blend: MixBlend,
    direction: MixDirection,
) {
    if direction == MixDirection::Out {
        if blend == MixBlend::Setup {
            skeleton.draw_order = (0..skeleton.slots.len()).collect();
        }
        return;
    }

    if timeline.frames.is_empty() {
        return;
    }

    if time < timeline.frames[0].time {
        if matches!(blend, MixBlend::Setup | MixBlend::First) {
            skeleton.draw_order = (0..skeleton.slots.len()).collect();
        }
        return;
    }

    let frame_index = timeline
        .frames
        .partition_point(|f| f.time <= time)
        .saturating_sub(1);
    match timeline.frames[frame_index].order.as_ref() {
        Some(order) if order.len() == skeleton.slots.len() => {
            skeleton.draw_order.clone_from(order);
        }
        _ => skeleton.draw_order = (0..skeleton.slots.len()).collect(),
    }
}

/// Collects the events keyed between `last_time` (exclusive) and `time`
/// (inclusive), accounting for loop wraparound.
pub(crate) fn collect_events(
    timeline: &EventTimeline,
    last_time: f32,
    time: f32,
    looped: bool,
    animation_start: f32,
    animation_end: f32,
    out: &mut Vec<Event>,
) {
    if timeline.events.is_empty() {
        return;
    }

    // When the time wraps, the second segment only runs once `time` reaches
    // the first event frame in range. This prevents duplicates when modulo
    // arithmetic lands `time` slightly below the first frame time.
    let first_time_in_range = timeline.events.iter().find_map(|ev| {
        (ev.time + TIME_EPSILON >= animation_start && ev.time <= animation_end + TIME_EPSILON)
            .then_some(ev.time)
    });
    let Some(first_time_in_range) = first_time_in_range else {
        return;
    };

    let mut emit_range = |from: f32, to: f32| {
        let from = from.max(animation_start - TIME_EPSILON);
        let to = to.min(animation_end);
        if to + TIME_EPSILON < animation_start || from - TIME_EPSILON > animation_end {
            return;
        }
        for ev in &timeline.events {
            if ev.time + TIME_EPSILON < animation_start || ev.time > animation_end + TIME_EPSILON {
                continue;
            }
            // Events fire for frames > lastTime and <= time. No epsilon on the
            // `time` side, otherwise near-boundary wraps can re-fire events.
            if ev.time > from && ev.time <= to {
                out.push(ev.clone());
            }
        }
    };

    if last_time < 0.0 {
        emit_range(-1.0, time);
        return;
    }

    if looped
        && (animation_end - animation_start).abs() > TIME_EPSILON
        && time + TIME_EPSILON < last_time
    {
        emit_range(last_time, animation_end);
        if time >= first_time_in_range {
            emit_range(-1.0, time);
        }
    } else {
        emit_range(last_time, time);
    }
}
