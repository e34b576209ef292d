use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use crate::runtime::{AnimationState, AnimationStateData};
use crate::{
    Animation, AnimationStateEvent, AnimationStateListener, BoneData, Curve, Error, RotateFrame,
    RotateTimeline, Skeleton, SkeletonData, Timeline, TrackEntrySnapshot, TranslateTimeline,
    Vec2Frame,
};

fn assert_approx(actual: f32, expected: f32) {
    let diff = (actual - expected).abs();
    assert!(
        diff <= 1.0e-4,
        "expected {expected}, got {actual} (diff {diff})"
    );
}

fn base_data() -> SkeletonData {
    let mut data = SkeletonData::default();
    data.bones.push(BoneData::new("root"));
    data
}

fn translate_clip(name: &str, duration: f32, x: f32) -> Animation {
    Animation::new(
        name,
        duration,
        vec![Timeline::Translate(TranslateTimeline {
            bone_index: 0,
            frames: vec![Vec2Frame {
                time: 0.0,
                x,
                y: 0.0,
                curve: [Curve::Linear; 2],
            }],
        })],
    )
}

fn translate_ramp_clip(name: &str, duration: f32, x: f32) -> Animation {
    Animation::new(
        name,
        duration,
        vec![Timeline::Translate(TranslateTimeline {
            bone_index: 0,
            frames: vec![
                Vec2Frame {
                    time: 0.0,
                    x: 0.0,
                    y: 0.0,
                    curve: [Curve::Linear; 2],
                },
                Vec2Frame {
                    time: duration,
                    x,
                    y: 0.0,
                    curve: [Curve::Linear; 2],
                },
            ],
        })],
    )
}

fn rotate_clip(name: &str, duration: f32, angle: f32) -> Animation {
    Animation::new(
        name,
        duration,
        vec![Timeline::Rotate(RotateTimeline {
            bone_index: 0,
            frames: vec![RotateFrame {
                time: 0.0,
                angle,
                curve: Curve::Linear,
            }],
        })],
    )
}

#[derive(Clone, Default)]
struct Recorder {
    log: Rc<RefCell<Vec<String>>>,
}

impl Recorder {
    fn label(entry: &TrackEntrySnapshot, event: &AnimationStateEvent) -> String {
        let kind = match event {
            AnimationStateEvent::Start => "start".to_string(),
            AnimationStateEvent::Interrupt => "interrupt".to_string(),
            AnimationStateEvent::End => "end".to_string(),
            AnimationStateEvent::Dispose => "dispose".to_string(),
            AnimationStateEvent::Complete => "complete".to_string(),
            AnimationStateEvent::Event(ev) => format!("event:{}", ev.name),
        };
        format!("{kind} {}", entry.animation_name)
    }

    fn count(&self, label: &str) -> usize {
        self.log.borrow().iter().filter(|l| l.as_str() == label).count()
    }
}

impl AnimationStateListener for Recorder {
    fn on_event(
        &mut self,
        _state: &mut AnimationState,
        entry: &TrackEntrySnapshot,
        event: &AnimationStateEvent,
    ) {
        self.log.borrow_mut().push(Self::label(entry, event));
    }
}

#[test]
fn set_unknown_animation_is_an_error() {
    let data = Arc::new(base_data());
    let mut state = AnimationState::new(AnimationStateData::new(data));
    assert!(matches!(
        state.set_animation(0, "missing", false),
        Err(Error::UnknownAnimation { .. })
    ));
    assert!(state.current(0).is_none());
}

#[test]
fn set_animation_poses_the_skeleton() {
    let mut data = base_data();
    data.register_animation(translate_clip("walk", 1.0, 10.0));
    let data = Arc::new(data);

    let mut state = AnimationState::new(AnimationStateData::new(data.clone()));
    let mut skeleton = Skeleton::new(data);

    state.set_animation(0, "walk", false).unwrap();
    assert!(state.apply(&mut skeleton));
    assert_approx(skeleton.bones[0].x, 10.0);
}

#[test]
fn apply_without_tracks_applies_nothing() {
    let data = Arc::new(base_data());
    let mut state = AnimationState::new(AnimationStateData::new(data.clone()));
    let mut skeleton = Skeleton::new(data);
    assert!(!state.apply(&mut skeleton));
}

#[test]
fn looping_entries_wrap_and_complete_once_per_apply() {
    let mut data = base_data();
    data.register_animation(translate_clip("walk", 1.0, 10.0));
    let data = Arc::new(data);

    let mut state = AnimationState::new(AnimationStateData::new(data.clone()));
    let recorder = Recorder::default();
    state.add_listener(recorder.clone());
    let mut skeleton = Skeleton::new(data);

    state.set_animation(0, "walk", true).unwrap();
    state.update(2.5);
    state.apply(&mut skeleton);

    assert_approx(state.current(0).unwrap().animation_time(), 0.5);
    assert_eq!(recorder.count("complete walk"), 1);

    // Nothing advanced, nothing new fires.
    state.update(0.0);
    state.apply(&mut skeleton);
    assert_eq!(recorder.count("complete walk"), 1);

    // Crossing the next loop boundary fires again.
    state.update(1.0);
    state.apply(&mut skeleton);
    assert_eq!(recorder.count("complete walk"), 2);
}

#[test]
fn non_looping_entries_freeze_on_the_last_frame() {
    let mut data = base_data();
    data.register_animation(translate_ramp_clip("reach", 1.0, 10.0));
    let data = Arc::new(data);

    let mut state = AnimationState::new(AnimationStateData::new(data.clone()));
    let recorder = Recorder::default();
    state.add_listener(recorder.clone());
    let mut skeleton = Skeleton::new(data);

    state.set_animation(0, "reach", false).unwrap();
    state.update(0.6);
    state.apply(&mut skeleton);
    assert_approx(skeleton.bones[0].x, 6.0);

    state.update(2.0);
    state.apply(&mut skeleton);
    assert_approx(state.current(0).unwrap().animation_time(), 1.0);
    assert_approx(skeleton.bones[0].x, 10.0);
    assert_eq!(recorder.count("complete reach"), 1);

    state.update(1.0);
    state.apply(&mut skeleton);
    assert_approx(skeleton.bones[0].x, 10.0);
    assert_eq!(recorder.count("complete reach"), 1);
}

#[test]
fn global_and_entry_time_scales_stack() {
    let mut data = base_data();
    data.register_animation(translate_clip("walk", 1.0, 10.0));
    let data = Arc::new(data);

    let mut state = AnimationState::new(AnimationStateData::new(data));
    state.time_scale = 0.5;
    let entry = state.set_animation(0, "walk", true).unwrap();
    entry.set_time_scale(&mut state, 0.5);

    state.update(2.0);
    assert_approx(state.current(0).unwrap().track_time, 0.5);
}

#[test]
fn delay_defers_application() {
    let mut data = base_data();
    data.register_animation(translate_clip("walk", 1.0, 10.0));
    let data = Arc::new(data);

    let mut state = AnimationState::new(AnimationStateData::new(data.clone()));
    let mut skeleton = Skeleton::new(data);

    let entry = state.set_animation(0, "walk", false).unwrap();
    entry.set_delay(&mut state, 0.5);

    state.update(0.2);
    assert!(!state.apply(&mut skeleton));
    assert_approx(skeleton.bones[0].x, 0.0);

    // The delay overflow becomes this frame's effective delta.
    state.update(0.4);
    assert!(state.apply(&mut skeleton));
    assert_approx(state.current(0).unwrap().track_time, 0.1);
    assert_approx(skeleton.bones[0].x, 10.0);
}

#[test]
fn queued_entry_promotes_when_its_delay_elapses() {
    let mut data = base_data();
    data.register_animation(translate_clip("walk", 1.0, 10.0));
    data.register_animation(translate_clip("jump", 1.0, 20.0));
    let data = Arc::new(data);

    let mut state = AnimationState::new(AnimationStateData::new(data.clone()));
    let recorder = Recorder::default();
    state.add_listener(recorder.clone());
    let mut skeleton = Skeleton::new(data);

    state.set_animation(0, "walk", false).unwrap();
    // Delay <= 0 resolves to the end of "walk".
    state.add_animation(0, "jump", false, 0.0).unwrap();

    state.update(0.5);
    state.apply(&mut skeleton);
    state.update(0.6);
    state.apply(&mut skeleton);
    assert_eq!(state.current(0).unwrap().animation.name, "walk");
    assert_eq!(recorder.count("complete walk"), 1);

    state.update(0.1);
    let current = state.current(0).unwrap();
    assert_eq!(current.animation.name, "jump");
    assert_approx(current.track_time, 0.2);
    assert_eq!(recorder.count("interrupt walk"), 1);
    assert_eq!(recorder.count("start jump"), 1);

    // The interrupted entry mixes out in a single frame and is disposed.
    state.apply(&mut skeleton);
    assert_approx(skeleton.bones[0].x, 20.0);
    state.update(0.1);
    assert!(state.current(0).unwrap().mixing_from().is_none());
    assert_eq!(recorder.count("end walk"), 1);
    assert_eq!(recorder.count("dispose walk"), 1);
    assert_eq!(recorder.count("complete walk"), 1);
}

#[test]
fn track_end_retires_the_track() {
    let mut data = base_data();
    data.register_animation(translate_clip("walk", 1.0, 10.0));
    let data = Arc::new(data);

    let mut state = AnimationState::new(AnimationStateData::new(data.clone()));
    let recorder = Recorder::default();
    state.add_listener(recorder.clone());
    let mut skeleton = Skeleton::new(data);

    let entry = state.set_animation(0, "walk", true).unwrap();
    entry.set_track_end(&mut state, 1.0);

    state.update(1.2);
    state.apply(&mut skeleton);
    assert!(state.current(0).is_some());

    state.update(0.1);
    assert!(state.current(0).is_none());
    assert_eq!(recorder.count("end walk"), 1);
    assert_eq!(recorder.count("dispose walk"), 1);
}

#[test]
fn clear_track_ends_every_chain_link() {
    let mut data = base_data();
    data.register_animation(translate_clip("a", 1.0, 10.0));
    data.register_animation(translate_clip("b", 1.0, 20.0));
    let data = Arc::new(data);

    let mut state_data = AnimationStateData::new(data.clone());
    state_data.set_mix("a", "b", 0.5).unwrap();
    let mut state = AnimationState::new(state_data);
    let recorder = Recorder::default();
    state.add_listener(recorder.clone());
    let mut skeleton = Skeleton::new(data);

    state.set_animation(0, "a", false).unwrap();
    state.apply(&mut skeleton);
    state.set_animation(0, "b", false).unwrap();
    state.update(0.1);

    recorder.log.borrow_mut().clear();
    state.clear_track(0);

    assert!(state.current(0).is_none());
    assert_eq!(
        recorder.log.borrow().as_slice(),
        ["end b", "dispose b", "end a", "dispose a"]
    );
}

#[test]
fn clear_tracks_batches_notifications() {
    let mut data = base_data();
    data.register_animation(translate_clip("a", 1.0, 10.0));
    data.register_animation(translate_clip("b", 1.0, 20.0));
    let data = Arc::new(data);

    let mut state = AnimationState::new(AnimationStateData::new(data));
    let recorder = Recorder::default();
    state.add_listener(recorder.clone());

    state.set_animation(0, "a", false).unwrap();
    state.set_animation(1, "b", false).unwrap();

    recorder.log.borrow_mut().clear();
    state.clear_tracks();

    assert_eq!(state.tracks_len(), 0);
    assert_eq!(
        recorder.log.borrow().as_slice(),
        ["end a", "dispose a", "end b", "dispose b"]
    );
}

#[test]
fn clear_next_disposes_queued_successors() {
    let mut data = base_data();
    data.register_animation(translate_clip("a", 1.0, 10.0));
    data.register_animation(translate_clip("b", 1.0, 20.0));
    data.register_animation(translate_clip("c", 1.0, 30.0));
    let data = Arc::new(data);

    let mut state = AnimationState::new(AnimationStateData::new(data));
    let recorder = Recorder::default();
    state.add_listener(recorder.clone());

    let a = state.set_animation(0, "a", false).unwrap();
    state.add_animation(0, "b", false, 5.0).unwrap();
    state.add_animation(0, "c", false, 5.0).unwrap();

    state.clear_next(a);

    assert_eq!(state.current(0).unwrap().animation.name, "a");
    assert_eq!(recorder.count("dispose b"), 1);
    assert_eq!(recorder.count("dispose c"), 1);
    assert_eq!(recorder.count("end a"), 0);
}

#[test]
fn add_animation_on_an_empty_track_starts_immediately() {
    let mut data = base_data();
    data.register_animation(translate_clip("walk", 1.0, 10.0));
    let data = Arc::new(data);

    let mut state = AnimationState::new(AnimationStateData::new(data));
    let recorder = Recorder::default();
    state.add_listener(recorder.clone());

    state.add_animation(0, "walk", false, -1.0).unwrap();
    let current = state.current(0).unwrap();
    assert_eq!(current.animation.name, "walk");
    assert_approx(current.delay, 0.0);
    assert_eq!(recorder.count("start walk"), 1);
}

#[test]
fn an_entry_never_applied_is_discarded_instead_of_mixed_from() {
    let mut data = base_data();
    data.register_animation(translate_clip("a", 1.0, 10.0));
    data.register_animation(translate_clip("b", 1.0, 20.0));
    data.register_animation(translate_clip("c", 1.0, 30.0));
    let data = Arc::new(data);

    let mut state = AnimationState::new(AnimationStateData::new(data.clone()));
    let recorder = Recorder::default();
    state.add_listener(recorder.clone());
    let mut skeleton = Skeleton::new(data);

    let a = state.set_animation(0, "a", false).unwrap();
    state.apply(&mut skeleton);
    state.set_animation(0, "b", false).unwrap();
    // "b" was never applied, so "c" mixes from "a" directly.
    state.set_animation(0, "c", false).unwrap();

    assert_eq!(recorder.count("interrupt b"), 1);
    assert_eq!(recorder.count("end b"), 1);
    assert_eq!(recorder.count("dispose b"), 1);
    let current = state.current(0).unwrap();
    assert_eq!(current.animation.name, "c");
    assert_eq!(current.mixing_from(), Some(a));
}

#[test]
fn set_empty_animation_mixes_the_track_out() {
    let mut data = base_data();
    data.register_animation(translate_clip("a", 0.0, 10.0));
    let data = Arc::new(data);

    let mut state = AnimationState::new(AnimationStateData::new(data.clone()));
    let recorder = Recorder::default();
    state.add_listener(recorder.clone());
    let mut skeleton = Skeleton::new(data);

    state.set_animation(0, "a", false).unwrap();
    state.apply(&mut skeleton);
    assert_approx(skeleton.bones[0].x, 10.0);

    state.set_empty_animation(0, 0.5).unwrap();
    state.update(0.25);
    skeleton.set_to_setup_pose();
    state.apply(&mut skeleton);
    assert_approx(skeleton.bones[0].x, 5.0);

    state.update(0.3);
    skeleton.set_to_setup_pose();
    state.apply(&mut skeleton);
    assert_approx(skeleton.bones[0].x, 0.0);

    // Mix complete: the chain collapses, then the empty entry retires.
    state.update(0.1);
    assert_eq!(recorder.count("end a"), 1);
    state.update(0.1);
    assert!(state.current(0).is_none());
    assert_eq!(recorder.count("end <empty>"), 1);
}

#[test]
fn update_zero_is_idempotent() {
    let mut data = base_data();
    data.register_animation(translate_ramp_clip("reach", 1.0, 10.0));
    let data = Arc::new(data);

    let mut state = AnimationState::new(AnimationStateData::new(data.clone()));
    let recorder = Recorder::default();
    state.add_listener(recorder.clone());
    let mut skeleton = Skeleton::new(data);

    state.set_animation(0, "reach", false).unwrap();
    state.update(0.4);
    state.apply(&mut skeleton);
    let x = skeleton.bones[0].x;
    let events_before = recorder.log.borrow().len();

    for _ in 0..3 {
        state.update(0.0);
        state.apply(&mut skeleton);
    }
    assert_approx(skeleton.bones[0].x, x);
    assert_eq!(recorder.log.borrow().len(), events_before);
}

#[test]
fn negative_and_non_finite_deltas_are_ignored() {
    let mut data = base_data();
    data.register_animation(translate_clip("walk", 1.0, 10.0));
    let data = Arc::new(data);

    let mut state = AnimationState::new(AnimationStateData::new(data));
    state.set_animation(0, "walk", false).unwrap();
    state.update(-1.0);
    state.update(f32::NAN);
    state.update(f32::INFINITY);
    assert_approx(state.current(0).unwrap().track_time, 0.0);
}

#[test]
fn apply_poses_multiple_skeletons_identically() {
    let mut data = base_data();
    data.register_animation(rotate_clip("a", 1.0, 90.0));
    data.register_animation(rotate_clip("b", 1.0, 30.0));
    let data = Arc::new(data);

    let mut state_data = AnimationStateData::new(data.clone());
    state_data.set_mix("a", "b", 0.2).unwrap();
    let mut state = AnimationState::new(state_data);
    let mut first = Skeleton::new(data.clone());
    let mut second = Skeleton::new(data);

    state.set_animation(0, "a", false).unwrap();
    state.apply(&mut first);
    state.set_animation(0, "b", false).unwrap();
    state.update(0.1);

    state.apply(&mut first);
    state.apply(&mut second);
    assert_eq!(first.bones[0].rotation, second.bones[0].rotation);

    // Re-applying without an update changes nothing.
    let rotation = first.bones[0].rotation;
    state.apply(&mut first);
    assert_eq!(first.bones[0].rotation, rotation);
    assert_approx(state.current(0).unwrap().mix_time, 0.1);
}

struct Chainer {
    fired: bool,
}

impl AnimationStateListener for Chainer {
    fn on_event(
        &mut self,
        state: &mut AnimationState,
        entry: &TrackEntrySnapshot,
        event: &AnimationStateEvent,
    ) {
        if !self.fired && matches!(event, AnimationStateEvent::Start) && entry.animation_name == "a"
        {
            self.fired = true;
            state.set_animation(0, "b", false).unwrap();
        }
    }
}

#[test]
fn listeners_may_mutate_the_state_during_a_drain() {
    let mut data = base_data();
    data.register_animation(translate_clip("a", 1.0, 10.0));
    data.register_animation(translate_clip("b", 1.0, 20.0));
    let data = Arc::new(data);

    let mut state = AnimationState::new(AnimationStateData::new(data));
    let recorder = Recorder::default();
    state.add_listener(Chainer { fired: false });
    state.add_listener(recorder.clone());

    state.set_animation(0, "a", false).unwrap();

    // Records queued by the listener are delivered by the same drain.
    assert_eq!(
        recorder.log.borrow().as_slice(),
        ["start a", "interrupt a", "end a", "dispose a", "start b"]
    );
    assert_eq!(state.current(0).unwrap().animation.name, "b");
}

#[test]
fn removed_listeners_stop_receiving_notifications() {
    let mut data = base_data();
    data.register_animation(translate_clip("a", 1.0, 10.0));
    let data = Arc::new(data);

    let mut state = AnimationState::new(AnimationStateData::new(data));
    let recorder = Recorder::default();
    let id = state.add_listener(recorder.clone());

    state.set_animation(0, "a", false).unwrap();
    assert_eq!(recorder.count("start a"), 1);

    state.remove_listener(id);
    state.clear_track(0);
    assert_eq!(recorder.count("end a"), 0);
}

#[test]
fn per_entry_listeners_fire_before_global_ones() {
    let mut data = base_data();
    data.register_animation(translate_clip("a", 1.0, 10.0));
    let data = Arc::new(data);

    #[derive(Clone)]
    struct Tagger {
        log: Rc<RefCell<Vec<String>>>,
        tag: &'static str,
    }
    impl AnimationStateListener for Tagger {
        fn on_event(
            &mut self,
            _state: &mut AnimationState,
            _entry: &TrackEntrySnapshot,
            event: &AnimationStateEvent,
        ) {
            if matches!(event, AnimationStateEvent::Complete) {
                self.log.borrow_mut().push(self.tag.to_string());
            }
        }
    }
    impl crate::TrackEntryListener for Tagger {
        fn on_event(
            &mut self,
            _state: &mut AnimationState,
            _entry: &TrackEntrySnapshot,
            event: &AnimationStateEvent,
        ) {
            if matches!(event, AnimationStateEvent::Complete) {
                self.log.borrow_mut().push(self.tag.to_string());
            }
        }
    }

    let log = Rc::new(RefCell::new(Vec::new()));
    let mut state = AnimationState::new(AnimationStateData::new(data.clone()));
    state.add_listener(Tagger {
        log: log.clone(),
        tag: "global",
    });
    let mut skeleton = Skeleton::new(data);

    let entry = state.set_animation(0, "a", true).unwrap();
    entry.set_listener(
        &mut state,
        Tagger {
            log: log.clone(),
            tag: "entry",
        },
    );

    state.update(1.5);
    state.apply(&mut skeleton);
    assert_eq!(log.borrow().as_slice(), ["entry", "global"]);
}

#[test]
fn handle_setters_are_no_ops_after_dispose() {
    let mut data = base_data();
    data.register_animation(translate_clip("a", 1.0, 10.0));
    let data = Arc::new(data);

    let mut state = AnimationState::new(AnimationStateData::new(data));
    let entry = state.set_animation(0, "a", false).unwrap();
    state.clear_track(0);

    entry.set_alpha(&mut state, 0.5);
    assert!(state.track_entry(entry).is_none());
}

#[test]
fn set_empty_animations_mixes_every_track_out() {
    let mut data = base_data();
    data.register_animation(translate_clip("a", 1.0, 10.0));
    data.register_animation(translate_clip("b", 1.0, 20.0));
    let data = Arc::new(data);

    let mut state = AnimationState::new(AnimationStateData::new(data));
    let recorder = Recorder::default();
    state.add_listener(recorder.clone());

    state.set_animation(0, "a", false).unwrap();
    state.set_animation(1, "b", false).unwrap();
    state.set_empty_animations(0.3).unwrap();

    assert_eq!(recorder.count("start <empty>"), 2);
    assert_eq!(recorder.count("interrupt a"), 1);
    assert_eq!(recorder.count("interrupt b"), 1);
    for track in 0..2 {
        let current = state.current(track).unwrap();
        assert_eq!(current.animation.name, "<empty>");
        assert_approx(current.mix_duration, 0.3);
        assert_approx(current.track_end, 0.3);
    }
}
