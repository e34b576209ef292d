use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, OnceLock};

use log::trace;

use crate::runtime::timeline::{
    UNKEYED_SETUP, apply_attachment, apply_color, apply_draw_order, apply_rotate,
    apply_rotate_mixed, apply_scale, apply_translate, collect_events,
};
use crate::{
    Animation, Error, Event, MixBlend, MixDirection, Skeleton, SkeletonData, Timeline,
};

const TIME_EPSILON: f32 = 1e-6;
const EMPTY_ANIMATION_INDEX: usize = usize::MAX;
const EMPTY_ANIMATION_NAME: &str = "<empty>";

// Process-wide sentinel used when mixing to or from nothing.
static EMPTY_ANIMATION: OnceLock<Arc<Animation>> = OnceLock::new();

fn empty_animation() -> Arc<Animation> {
    EMPTY_ANIMATION
        .get_or_init(|| {
            Arc::new(Animation {
                name: EMPTY_ANIMATION_NAME.to_string(),
                duration: 0.0,
                timelines: Vec::new(),
            })
        })
        .clone()
}

fn ensure_mix_duration(mix_duration: f32) -> Result<(), Error> {
    if !mix_duration.is_finite() || mix_duration < 0.0 {
        return Err(Error::InvalidValue {
            message: "mix duration must be finite and >= 0".to_string(),
        });
    }
    Ok(())
}

/// How one timeline of a mixing-out entry is weighted while it co-exists with
/// a mixing chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TimelineMode {
    First,
    Subsequent,
    HoldFirst,
    HoldSubsequent,
    HoldMix,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct EntryId {
    index: usize,
    generation: u32,
}

#[derive(Debug)]
struct EntrySlot {
    generation: u32,
    entry: Option<TrackEntry>,
}

/// Cross-fade configuration shared by every [`AnimationState`] built from it.
#[derive(Clone, Debug)]
pub struct AnimationStateData {
    pub skeleton_data: Arc<SkeletonData>,
    pub default_mix: f32,
    mixes: HashMap<(usize, usize), f32>,
}

impl AnimationStateData {
    pub fn new(skeleton_data: Arc<SkeletonData>) -> Self {
        Self {
            skeleton_data,
            default_mix: 0.0,
            mixes: HashMap::new(),
        }
    }

    /// Sets the cross-fade duration used when `from` is interrupted by `to`.
    pub fn set_mix(&mut self, from: &str, to: &str, duration: f32) -> Result<(), Error> {
        ensure_mix_duration(duration)?;
        let Some((from_index, _)) = self.skeleton_data.animation(from) else {
            return Err(Error::UnknownAnimation {
                name: from.to_string(),
            });
        };
        let Some((to_index, _)) = self.skeleton_data.animation(to) else {
            return Err(Error::UnknownAnimation {
                name: to.to_string(),
            });
        };
        self.mixes.insert((from_index, to_index), duration);
        Ok(())
    }

    fn mix_duration(&self, from_index: usize, to_index: usize) -> f32 {
        self.mixes
            .get(&(from_index, to_index))
            .copied()
            .unwrap_or(self.default_mix)
    }
}

/// One playback instance of an animation on one track.
pub struct TrackEntry {
    pub track_index: usize,
    pub animation_index: usize,
    pub animation: Arc<Animation>,
    pub looped: bool,
    pub reverse: bool,
    pub shortest_rotation: bool,
    pub hold_previous: bool,

    /// Seconds until this entry becomes current (or starts advancing).
    pub delay: f32,
    pub track_time: f32,
    /// Track time at which the entry is auto-cleared.
    pub track_end: f32,
    pub time_scale: f32,
    pub animation_start: f32,
    pub animation_end: f32,

    // Double-buffered previous-frame times; -1 marks "never yet applied".
    pub animation_last: f32,
    pub track_last: f32,
    pub next_animation_last: f32,
    pub next_track_last: f32,

    pub alpha: f32,
    pub mix_blend: MixBlend,
    pub mix_time: f32,
    pub mix_duration: f32,
    pub interrupt_alpha: f32,
    pub total_alpha: f32,

    pub event_threshold: f32,
    pub alpha_attachment_threshold: f32,
    pub mix_attachment_threshold: f32,
    pub mix_draw_order_threshold: f32,

    mixing_from: Option<EntryId>,
    mixing_to: Option<EntryId>,

    listener: Option<Box<dyn TrackEntryListener>>,

    timeline_mode: Vec<TimelineMode>,
    timeline_hold_mix: Vec<Option<EntryId>>,
    // Two floats per rotate timeline: accumulated total rotation + last diff.
    timelines_rotation: Vec<f32>,
}

impl std::fmt::Debug for TrackEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackEntry")
            .field("track_index", &self.track_index)
            .field("animation", &self.animation.name)
            .field("looped", &self.looped)
            .field("delay", &self.delay)
            .field("track_time", &self.track_time)
            .field("track_end", &self.track_end)
            .field("time_scale", &self.time_scale)
            .field("alpha", &self.alpha)
            .field("mix_time", &self.mix_time)
            .field("mix_duration", &self.mix_duration)
            .field("mixing_from", &self.mixing_from)
            .field("mixing_to", &self.mixing_to)
            .finish()
    }
}

impl TrackEntry {
    fn new(
        track_index: usize,
        animation_index: usize,
        animation: Arc<Animation>,
        looped: bool,
    ) -> Self {
        let animation_end = animation.duration;
        Self {
            track_index,
            animation_index,
            animation,
            looped,
            reverse: false,
            shortest_rotation: false,
            hold_previous: false,
            delay: 0.0,
            track_time: 0.0,
            track_end: f32::INFINITY,
            time_scale: 1.0,
            animation_start: 0.0,
            animation_end,
            animation_last: -1.0,
            track_last: -1.0,
            next_animation_last: -1.0,
            next_track_last: -1.0,
            alpha: 1.0,
            mix_blend: MixBlend::Replace,
            mix_time: 0.0,
            mix_duration: 0.0,
            interrupt_alpha: 1.0,
            total_alpha: 0.0,
            event_threshold: 0.0,
            alpha_attachment_threshold: 0.0,
            mix_attachment_threshold: 0.0,
            mix_draw_order_threshold: 0.0,
            mixing_from: None,
            mixing_to: None,
            listener: None,
            timeline_mode: Vec::new(),
            timeline_hold_mix: Vec::new(),
            timelines_rotation: Vec::new(),
        }
    }

    /// Maps `track_time` into `[animation_start, animation_end]`. Non-looping
    /// entries freeze on their last frame rather than leaving the range.
    pub fn animation_time(&self) -> f32 {
        if self.looped {
            let duration = self.animation_end - self.animation_start;
            if duration.abs() <= TIME_EPSILON {
                return self.animation_start;
            }
            self.animation_start + self.track_time.rem_euclid(duration)
        } else {
            (self.track_time + self.animation_start).min(self.animation_end)
        }
    }

    /// Track time at which the current loop iteration (or the whole clip, if
    /// not looping) finishes.
    pub fn track_complete(&self) -> f32 {
        let duration = self.animation_end - self.animation_start;
        if duration != 0.0 {
            if self.looped {
                return duration * (1.0 + (self.track_time / duration).floor());
            }
            if self.track_time < duration {
                return duration;
            }
        }
        self.track_time
    }

    pub fn mixing_from(&self) -> Option<TrackEntryHandle> {
        self.mixing_from.map(|id| TrackEntryHandle { id })
    }

    pub fn mixing_to(&self) -> Option<TrackEntryHandle> {
        self.mixing_to.map(|id| TrackEntryHandle { id })
    }
}

/// Stable handle to a pooled [`TrackEntry`]. Setters go through the owning
/// [`AnimationState`] and become no-ops once the entry is disposed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrackEntryHandle {
    id: EntryId,
}

impl TrackEntryHandle {
    fn with_entry_mut(&self, state: &mut AnimationState, f: impl FnOnce(&mut TrackEntry)) {
        if let Some(entry) = state.entry_mut(self.id) {
            f(entry);
        }
    }

    pub fn set_listener<L: TrackEntryListener + 'static>(
        &self,
        state: &mut AnimationState,
        listener: L,
    ) {
        self.with_entry_mut(state, |entry| entry.listener = Some(Box::new(listener)));
    }

    pub fn set_delay(&self, state: &mut AnimationState, delay: f32) {
        self.with_entry_mut(state, |entry| entry.delay = delay);
    }

    pub fn set_track_end(&self, state: &mut AnimationState, track_end: f32) {
        self.with_entry_mut(state, |entry| entry.track_end = track_end);
    }

    pub fn set_time_scale(&self, state: &mut AnimationState, time_scale: f32) {
        self.with_entry_mut(state, |entry| entry.time_scale = time_scale);
    }

    pub fn set_alpha(&self, state: &mut AnimationState, alpha: f32) {
        self.with_entry_mut(state, |entry| entry.alpha = alpha);
    }

    pub fn set_mix_duration(&self, state: &mut AnimationState, mix_duration: f32) {
        self.with_entry_mut(state, |entry| entry.mix_duration = mix_duration);
    }

    pub fn set_mix_blend(&self, state: &mut AnimationState, mix_blend: MixBlend) {
        self.with_entry_mut(state, |entry| entry.mix_blend = mix_blend);
    }

    pub fn set_hold_previous(&self, state: &mut AnimationState, hold_previous: bool) {
        self.with_entry_mut(state, |entry| entry.hold_previous = hold_previous);
    }

    pub fn set_reverse(&self, state: &mut AnimationState, reverse: bool) {
        self.with_entry_mut(state, |entry| entry.reverse = reverse);
    }

    pub fn set_shortest_rotation(&self, state: &mut AnimationState, shortest_rotation: bool) {
        self.with_entry_mut(state, |entry| entry.shortest_rotation = shortest_rotation);
    }

    pub fn set_event_threshold(&self, state: &mut AnimationState, threshold: f32) {
        self.with_entry_mut(state, |entry| entry.event_threshold = threshold);
    }

    pub fn set_alpha_attachment_threshold(&self, state: &mut AnimationState, threshold: f32) {
        self.with_entry_mut(state, |entry| entry.alpha_attachment_threshold = threshold);
    }

    pub fn set_mix_attachment_threshold(&self, state: &mut AnimationState, threshold: f32) {
        self.with_entry_mut(state, |entry| entry.mix_attachment_threshold = threshold);
    }

    pub fn set_mix_draw_order_threshold(&self, state: &mut AnimationState, threshold: f32) {
        self.with_entry_mut(state, |entry| entry.mix_draw_order_threshold = threshold);
    }

    pub fn set_animation_start(&self, state: &mut AnimationState, animation_start: f32) {
        self.with_entry_mut(state, |entry| entry.animation_start = animation_start);
    }

    pub fn set_animation_end(&self, state: &mut AnimationState, animation_end: f32) {
        self.with_entry_mut(state, |entry| entry.animation_end = animation_end);
    }

    pub fn set_animation_last(&self, state: &mut AnimationState, animation_last: f32) {
        self.with_entry_mut(state, |entry| {
            entry.animation_last = animation_last;
            entry.next_animation_last = animation_last;
        });
    }

    /// Discards the rotation continuity scratch so the next application picks
    /// the shortest arc from wherever the bones currently are.
    pub fn reset_rotation_directions(&self, state: &mut AnimationState) {
        self.with_entry_mut(state, |entry| entry.timelines_rotation.clear());
    }
}

/// What a listener sees of the entry a notification is about. Snapshots stay
/// valid even when the entry itself has already been returned to the pool.
#[derive(Clone, Debug)]
pub struct TrackEntrySnapshot {
    pub track_index: usize,
    /// `None` for the empty animation.
    pub animation_index: Option<usize>,
    pub animation_name: String,
    pub track_time: f32,
}

#[derive(Clone, Debug)]
pub enum AnimationStateEvent {
    Start,
    Interrupt,
    End,
    Dispose,
    Complete,
    Event(Event),
}

pub trait TrackEntryListener {
    fn on_event(
        &mut self,
        state: &mut AnimationState,
        entry: &TrackEntrySnapshot,
        event: &AnimationStateEvent,
    );
}

pub trait AnimationStateListener {
    fn on_event(
        &mut self,
        state: &mut AnimationState,
        entry: &TrackEntrySnapshot,
        event: &AnimationStateEvent,
    );
}

/// Token returned by [`AnimationState::add_listener`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ListenerId(u64);

struct ListenerSlot {
    id: u64,
    listener: Option<Box<dyn AnimationStateListener>>,
}

#[derive(Clone, Debug)]
enum QueuedKind {
    Start,
    Interrupt,
    End,
    Dispose,
    Complete,
    Event(Event),
}

#[derive(Clone, Debug)]
struct QueuedRecord {
    entry: EntryId,
    kind: QueuedKind,
}

/// Deferred notification buffer. Decouples the moment a transition is decided
/// from the moment listeners run, so listeners can safely mutate the state.
#[derive(Default)]
struct EventQueue {
    records: Vec<QueuedRecord>,
    draining: bool,
    drain_disabled: bool,
    /// Set by start/end: the set of current+mixing entries changed, so hold
    /// modes must be recomputed on the next apply.
    changed: bool,
}

impl EventQueue {
    fn push(&mut self, entry: EntryId, kind: QueuedKind) {
        self.records.push(QueuedRecord { entry, kind });
    }

    fn start(&mut self, entry: EntryId) {
        self.push(entry, QueuedKind::Start);
        self.changed = true;
    }

    fn interrupt(&mut self, entry: EntryId) {
        self.push(entry, QueuedKind::Interrupt);
    }

    fn end(&mut self, entry: EntryId) {
        self.push(entry, QueuedKind::End);
        self.changed = true;
    }

    fn dispose(&mut self, entry: EntryId) {
        self.push(entry, QueuedKind::Dispose);
    }

    fn complete(&mut self, entry: EntryId) {
        self.push(entry, QueuedKind::Complete);
    }

    fn event(&mut self, entry: EntryId, event: Event) {
        self.push(entry, QueuedKind::Event(event));
    }
}

#[derive(Default)]
struct Track {
    current: Option<EntryId>,
    queue: VecDeque<EntryId>,
}

/// The track/mixing state machine. Call [`update`](Self::update) then
/// [`apply`](Self::apply) once per frame; `apply` may be called repeatedly to
/// pose several skeletons identically.
pub struct AnimationState {
    data: AnimationStateData,
    pub time_scale: f32,
    tracks: Vec<Track>,
    entries: Vec<EntrySlot>,
    free_list: Vec<usize>,
    queue: EventQueue,
    listeners: Vec<ListenerSlot>,
    next_listener_id: u64,
    // Scratch reused across apply passes.
    events: Vec<Event>,
    property_ids: HashSet<u64>,
    unkeyed_state: i32,
}

impl AnimationState {
    pub fn new(data: AnimationStateData) -> Self {
        Self {
            data,
            time_scale: 1.0,
            tracks: Vec::new(),
            entries: Vec::new(),
            free_list: Vec::new(),
            queue: EventQueue::default(),
            listeners: Vec::new(),
            next_listener_id: 0,
            events: Vec::new(),
            property_ids: HashSet::new(),
            unkeyed_state: 0,
        }
    }

    pub fn data(&self) -> &AnimationStateData {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut AnimationStateData {
        &mut self.data
    }

    pub fn tracks_len(&self) -> usize {
        self.tracks.len()
    }

    pub fn current(&self, track_index: usize) -> Option<&TrackEntry> {
        let id = self.tracks.get(track_index)?.current?;
        self.entry(id)
    }

    pub fn current_handle(&self, track_index: usize) -> Option<TrackEntryHandle> {
        let id = self.tracks.get(track_index)?.current?;
        self.entry(id).map(|_| TrackEntryHandle { id })
    }

    pub fn track_entry(&self, handle: TrackEntryHandle) -> Option<&TrackEntry> {
        self.entry(handle.id)
    }

    pub fn add_listener<L: AnimationStateListener + 'static>(&mut self, listener: L) -> ListenerId {
        let id = self.next_listener_id;
        self.next_listener_id += 1;
        self.listeners.push(ListenerSlot {
            id,
            listener: Some(Box::new(listener)),
        });
        ListenerId(id)
    }

    pub fn remove_listener(&mut self, id: ListenerId) {
        self.listeners.retain(|slot| slot.id != id.0);
    }

    /// Sets the current animation of a track, cross-fading from whatever was
    /// playing there.
    pub fn set_animation(
        &mut self,
        track_index: usize,
        animation_name: &str,
        looped: bool,
    ) -> Result<TrackEntryHandle, Error> {
        let (animation_index, animation) = self
            .data
            .skeleton_data
            .animation(animation_name)
            .ok_or_else(|| Error::UnknownAnimation {
                name: animation_name.to_string(),
            })?;
        let animation = Arc::new(animation.clone());
        Ok(self.set_animation_internal(track_index, animation_index, animation, looped))
    }

    /// Queues an animation after the last entry on a track. `delay <= 0` is
    /// resolved against the previous entry's completion time minus the mix.
    pub fn add_animation(
        &mut self,
        track_index: usize,
        animation_name: &str,
        looped: bool,
        delay: f32,
    ) -> Result<TrackEntryHandle, Error> {
        if !delay.is_finite() {
            return Err(Error::InvalidValue {
                message: "delay must be finite".to_string(),
            });
        }
        let (animation_index, animation) = self
            .data
            .skeleton_data
            .animation(animation_name)
            .ok_or_else(|| Error::UnknownAnimation {
                name: animation_name.to_string(),
            })?;
        let animation = Arc::new(animation.clone());
        Ok(self.add_animation_internal(track_index, animation_index, animation, looped, delay))
    }

    /// Mixes the track out to nothing over `mix_duration` seconds.
    pub fn set_empty_animation(
        &mut self,
        track_index: usize,
        mix_duration: f32,
    ) -> Result<TrackEntryHandle, Error> {
        ensure_mix_duration(mix_duration)?;
        let handle =
            self.set_animation_internal(track_index, EMPTY_ANIMATION_INDEX, empty_animation(), false);
        if let Some(entry) = self.entry_mut(handle.id) {
            entry.mix_duration = mix_duration;
            entry.track_end = mix_duration;
        }
        Ok(handle)
    }

    pub fn add_empty_animation(
        &mut self,
        track_index: usize,
        mix_duration: f32,
        delay: f32,
    ) -> Result<TrackEntryHandle, Error> {
        ensure_mix_duration(mix_duration)?;
        if !delay.is_finite() {
            return Err(Error::InvalidValue {
                message: "delay must be finite".to_string(),
            });
        }
        let handle = self.add_animation_internal(
            track_index,
            EMPTY_ANIMATION_INDEX,
            empty_animation(),
            false,
            delay,
        );
        if let Some(entry) = self.entry_mut(handle.id) {
            // Shift the delay so the mix out ends when the previous entry ends.
            if delay <= 0.0 {
                entry.delay = (entry.delay + entry.mix_duration - mix_duration).max(0.0);
            }
            entry.mix_duration = mix_duration;
            entry.track_end = mix_duration;
        }
        Ok(handle)
    }

    /// Mixes every track with a current entry out to nothing, delivering all
    /// resulting notifications in one batch.
    pub fn set_empty_animations(&mut self, mix_duration: f32) -> Result<(), Error> {
        ensure_mix_duration(mix_duration)?;
        let old_drain_disabled = self.queue.drain_disabled;
        self.queue.drain_disabled = true;
        for track_index in 0..self.tracks.len() {
            if self.tracks[track_index].current.is_none() {
                continue;
            }
            let handle = self.set_animation_internal(
                track_index,
                EMPTY_ANIMATION_INDEX,
                empty_animation(),
                false,
            );
            if let Some(entry) = self.entry_mut(handle.id) {
                entry.mix_duration = mix_duration;
                entry.track_end = mix_duration;
            }
        }
        self.queue.drain_disabled = old_drain_disabled;
        self.drain();
        Ok(())
    }

    fn set_animation_internal(
        &mut self,
        track_index: usize,
        animation_index: usize,
        animation: Arc<Animation>,
        looped: bool,
    ) -> TrackEntryHandle {
        self.ensure_track(track_index);
        trace!("track {track_index}: set animation '{}'", animation.name);

        let mut interrupt = true;
        if let Some(current_id) = self.tracks[track_index].current {
            let never_applied = self
                .entry(current_id)
                .is_some_and(|entry| entry.next_track_last < 0.0);
            if never_applied {
                // Don't mix from an entry that was never applied; replace it
                // with its own mixing-from source.
                let from = self.entry(current_id).and_then(|entry| entry.mixing_from);
                self.tracks[track_index].current = from;
                self.queue.interrupt(current_id);
                self.queue.end(current_id);
                self.dispose_queued(track_index);
                if let Some(from_id) = from {
                    if let Some(entry) = self.entry_mut(from_id) {
                        entry.mixing_to = None;
                    }
                }
                if let Some(entry) = self.entry_mut(current_id) {
                    entry.mixing_from = None;
                    entry.mixing_to = None;
                }
                interrupt = false;
            } else {
                self.dispose_queued(track_index);
            }
        }

        let last = self.tracks[track_index].current;
        let entry_id = self.alloc_entry(TrackEntry::new(
            track_index,
            animation_index,
            animation,
            looped,
        ));
        if let Some(last_id) = last {
            let from_index = self
                .entry(last_id)
                .map(|entry| entry.animation_index)
                .unwrap_or(EMPTY_ANIMATION_INDEX);
            let mix_duration = self.data.mix_duration(from_index, animation_index);
            if let Some(entry) = self.entry_mut(entry_id) {
                entry.mix_duration = mix_duration;
            }
        }
        self.set_current(track_index, entry_id, interrupt);
        self.drain();
        TrackEntryHandle { id: entry_id }
    }

    fn add_animation_internal(
        &mut self,
        track_index: usize,
        animation_index: usize,
        animation: Arc<Animation>,
        looped: bool,
        delay: f32,
    ) -> TrackEntryHandle {
        self.ensure_track(track_index);
        trace!("track {track_index}: queued animation '{}'", animation.name);

        let last = {
            let track = &self.tracks[track_index];
            track.queue.back().copied().or(track.current)
        };
        let entry_id = self.alloc_entry(TrackEntry::new(
            track_index,
            animation_index,
            animation,
            looped,
        ));

        let (resolved_delay, mix_duration) = if let Some(last_id) = last {
            let (last_complete, mix_duration) = self
                .entry(last_id)
                .map(|last| {
                    (
                        last.track_complete(),
                        self.data.mix_duration(last.animation_index, animation_index),
                    )
                })
                .unwrap_or((0.0, 0.0));
            let resolved = if delay > 0.0 {
                delay
            } else {
                (delay + last_complete - mix_duration).max(0.0)
            };
            (resolved, mix_duration)
        } else {
            (delay.max(0.0), 0.0)
        };
        if let Some(entry) = self.entry_mut(entry_id) {
            entry.delay = resolved_delay;
            entry.mix_duration = mix_duration;
        }

        if self.tracks[track_index].current.is_none() {
            self.set_current(track_index, entry_id, true);
            self.drain();
        } else {
            self.tracks[track_index].queue.push_back(entry_id);
        }
        TrackEntryHandle { id: entry_id }
    }

    /// Installs `entry_id` as the track's current entry, turning the previous
    /// occupant into its mixing-from source.
    fn set_current(&mut self, track_index: usize, entry_id: EntryId, interrupt: bool) {
        let from = self.tracks[track_index].current.replace(entry_id);
        if let Some(from_id) = from {
            if interrupt {
                self.queue.interrupt(from_id);
            }
            // A rapid double interruption must not pop: scale by how far the
            // interrupted entry's own mix had come.
            let interrupt_alpha_scale = self
                .entry(from_id)
                .filter(|prev| prev.mixing_from.is_some() && prev.mix_duration > 0.0)
                .map(|prev| (prev.mix_time / prev.mix_duration).clamp(0.0, 1.0))
                .unwrap_or(1.0);
            if let Some(entry) = self.entry_mut(entry_id) {
                entry.mixing_from = Some(from_id);
                entry.mix_time = 0.0;
                entry.interrupt_alpha *= interrupt_alpha_scale;
            }
            if let Some(prev) = self.entry_mut(from_id) {
                prev.mixing_to = Some(entry_id);
                // Mixing out re-derives rotation direction from scratch.
                prev.timelines_rotation.clear();
            }
        }
        self.queue.start(entry_id);
    }

    /// Advances the scheduling state machine. Touches no skeleton.
    pub fn update(&mut self, delta: f32) {
        if !delta.is_finite() || delta < 0.0 {
            return;
        }
        let delta = delta * self.time_scale;

        for track_index in 0..self.tracks.len() {
            let Some(current_id) = self.tracks[track_index].current else {
                continue;
            };
            if self.entry(current_id).is_none() {
                self.tracks[track_index].current = None;
                continue;
            }

            let mut advanced = None;
            if let Some(current) = self.entry_mut(current_id) {
                current.animation_last = current.next_animation_last;
                current.track_last = current.next_track_last;

                let mut current_delta = delta * current.time_scale;
                let mut ready = true;
                if current.delay > 0.0 {
                    current.delay -= current_delta;
                    if current.delay > 0.0 {
                        ready = false;
                    } else {
                        // The delay overflow is this frame's effective delta.
                        current_delta = -current.delay;
                        current.delay = 0.0;
                    }
                }
                if ready {
                    advanced = Some((
                        current_delta,
                        current.track_last,
                        current.mixing_from.is_some(),
                        current.track_end,
                    ));
                }
            }
            let Some((current_delta, track_last, has_mixing_from, track_end)) = advanced else {
                continue;
            };

            if let Some(next_id) = self.tracks[track_index].queue.front().copied() {
                // The queued entry's delay is measured against this entry's
                // track time.
                let next_delay = self.entry(next_id).map(|next| next.delay).unwrap_or(0.0);
                let next_time = track_last - next_delay;
                if next_time + TIME_EPSILON >= 0.0 {
                    let old_time_scale =
                        self.entry(current_id).map(|e| e.time_scale).unwrap_or(0.0);
                    if let Some(current) = self.entry_mut(current_id) {
                        current.track_time += current_delta;
                    }
                    self.tracks[track_index].queue.pop_front();
                    if let Some(next) = self.entry_mut(next_id) {
                        next.delay = 0.0;
                        // Carry the leftover time, rescaled to the new entry.
                        if old_time_scale.abs() >= TIME_EPSILON {
                            next.track_time +=
                                (next_time / old_time_scale + delta) * next.time_scale;
                        }
                    }
                    self.set_current(track_index, next_id, true);
                    // A freshly engaged chain must not lose this frame's delta.
                    let mut id = next_id;
                    while let Some(from) = self.entry(id).and_then(|e| e.mixing_from) {
                        if let Some(entry) = self.entry_mut(id) {
                            entry.mix_time += delta;
                        }
                        id = from;
                    }
                    continue;
                }
            } else if !has_mixing_from && track_last >= 0.0 && track_last + TIME_EPSILON >= track_end
            {
                trace!("track {track_index}: entry finished, track cleared");
                self.tracks[track_index].current = None;
                self.queue.end(current_id);
                continue;
            }

            if has_mixing_from && self.update_mixing_from(current_id, delta) {
                // The chain has fully mixed out; unlink every remaining link.
                let mut from = self.entry(current_id).and_then(|e| e.mixing_from);
                if let Some(entry) = self.entry_mut(current_id) {
                    entry.mixing_from = None;
                }
                while let Some(from_id) = from {
                    self.queue.end(from_id);
                    from = self.entry(from_id).and_then(|e| e.mixing_from);
                    if let Some(entry) = self.entry_mut(from_id) {
                        entry.mixing_from = None;
                        entry.mixing_to = None;
                    }
                }
            }

            if let Some(current) = self.entry_mut(current_id) {
                current.track_time += current_delta;
            }
        }

        self.drain();
    }

    /// Returns true once the entire chain below `to_id` has mixed out.
    /// Recurses toward the oldest link first; finished links are spliced out
    /// one at a time, innermost first.
    fn update_mixing_from(&mut self, to_id: EntryId, delta: f32) -> bool {
        let Some(from_id) = self.entry(to_id).and_then(|entry| entry.mixing_from) else {
            return true;
        };

        let finished = self.update_mixing_from(from_id, delta);

        if let Some(from) = self.entry_mut(from_id) {
            from.animation_last = from.next_animation_last;
            from.track_last = from.next_track_last;
        }

        let (to_next_track_last, to_mix_time, to_mix_duration) = self
            .entry(to_id)
            .map(|to| (to.next_track_last, to.mix_time, to.mix_duration))
            .unwrap_or((-1.0, 0.0, 0.0));

        // The to entry was applied at least once and the mix is complete.
        if to_next_track_last >= 0.0 && to_mix_time + TIME_EPSILON >= to_mix_duration {
            let from_total_alpha = self.entry(from_id).map(|e| e.total_alpha).unwrap_or(0.0);
            // The from entry either no longer contributes, or the transition
            // was a single frame.
            if from_total_alpha.abs() <= TIME_EPSILON || to_mix_duration <= 0.0 {
                let next_from = self.entry(from_id).and_then(|from| from.mixing_from);
                let from_interrupt_alpha =
                    self.entry(from_id).map(|e| e.interrupt_alpha).unwrap_or(1.0);
                if let Some(to) = self.entry_mut(to_id) {
                    to.mixing_from = next_from;
                    to.interrupt_alpha = from_interrupt_alpha;
                }
                if let Some(next_from_id) = next_from {
                    if let Some(entry) = self.entry_mut(next_from_id) {
                        entry.mixing_to = Some(to_id);
                    }
                }
                if let Some(from) = self.entry_mut(from_id) {
                    from.mixing_from = None;
                    from.mixing_to = None;
                }
                trace!("mix from '{}' finished", self.snapshot(from_id).animation_name);
                self.queue.end(from_id);
            }
            return finished;
        }

        // Mix time is not affected by the entry's own time scale.
        if let Some(from) = self.entry_mut(from_id) {
            from.track_time += delta * from.time_scale;
        }
        if let Some(to) = self.entry_mut(to_id) {
            to.mix_time += delta;
        }
        false
    }

    /// Poses the skeleton from the current state. Pure with respect to the
    /// scheduling state; may be called several times per update to pose
    /// multiple skeletons. Returns whether any track applied.
    pub fn apply(&mut self, skeleton: &mut Skeleton) -> bool {
        if self.queue.changed {
            self.recompute_hold_modes();
        }

        let mut applied = false;
        for track_index in 0..self.tracks.len() {
            let Some(current_id) = self.tracks[track_index].current else {
                continue;
            };
            let Some(delay) = self.entry(current_id).map(|e| e.delay) else {
                continue;
            };
            if delay > 0.0 {
                continue;
            }
            applied = true;

            // Track 0 poses the whole skeleton; higher tracks overlay it.
            let blend = if track_index == 0 {
                MixBlend::First
            } else {
                self.entry(current_id)
                    .map(|e| e.mix_blend)
                    .unwrap_or(MixBlend::Replace)
            };

            let mut alpha = self.entry(current_id).map(|e| e.alpha).unwrap_or(1.0);
            if self.entry(current_id).and_then(|e| e.mixing_from).is_some() {
                alpha *= self.apply_mixing_from(current_id, skeleton, blend);
            } else {
                let end_reached = self.tracks[track_index].queue.is_empty()
                    && self.entry(current_id).is_some_and(|e| {
                        e.track_end.is_finite() && e.track_time + TIME_EPSILON >= e.track_end
                    });
                if end_reached {
                    // Lower tracks show through on the entry's last pass.
                    alpha = 0.0;
                }
            }

            let Some((animation, time, reverse, alpha_attachment_threshold)) =
                self.entry(current_id).map(|e| {
                    (
                        e.animation.clone(),
                        e.animation_time(),
                        e.reverse,
                        e.alpha_attachment_threshold,
                    )
                })
            else {
                continue;
            };

            let apply_time = if reverse {
                animation.duration - time
            } else {
                time
            };
            let attachments = alpha >= alpha_attachment_threshold;

            self.apply_entry_pose(
                current_id,
                &animation,
                skeleton,
                apply_time,
                alpha,
                blend,
                attachments,
            );
            // Reversed playback does not fire authored events.
            self.queue_events_for(current_id, None, !reverse);
        }

        // Any slot a mixing-out entry touched without a later timeline keying
        // a concrete attachment falls back to the setup attachment.
        let setup_state = self.unkeyed_state + UNKEYED_SETUP;
        for (i, slot) in skeleton.slots.iter_mut().enumerate() {
            if slot.attachment_state == setup_state {
                slot.attachment = skeleton.data.slots.get(i).and_then(|s| s.attachment.clone());
            }
        }
        // Advancing the counter after each pass avoids resetting every slot's
        // tag each frame.
        self.unkeyed_state = self.unkeyed_state.wrapping_add(2);

        self.drain();
        applied
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_entry_pose(
        &mut self,
        entry_id: EntryId,
        animation: &Animation,
        skeleton: &mut Skeleton,
        time: f32,
        alpha: f32,
        blend: MixBlend,
        attachments: bool,
    ) {
        if alpha <= 0.0 {
            return;
        }

        let (track_index, looped, shortest_rotation) = match self.entry(entry_id) {
            Some(e) => (e.track_index, e.looped, e.shortest_rotation),
            None => return,
        };

        let mut time = time;
        if looped && animation.duration > 0.0 {
            time = time.rem_euclid(animation.duration);
        }

        let direct = (track_index == 0 && alpha >= 1.0) || blend == MixBlend::Add;

        let mut timeline_mode = self
            .entry(entry_id)
            .map(|e| e.timeline_mode.clone())
            .unwrap_or_default();
        if timeline_mode.len() != animation.timelines.len() {
            self.queue.changed = true;
            self.recompute_hold_modes();
            timeline_mode = self
                .entry(entry_id)
                .map(|e| e.timeline_mode.clone())
                .unwrap_or_default();
        }

        let rotate_count = animation
            .timelines
            .iter()
            .filter(|t| matches!(t, Timeline::Rotate(_)))
            .count();
        let first_frame = self
            .entry_mut(entry_id)
            .map(|entry| {
                let expected = rotate_count * 2;
                let first = entry.timelines_rotation.len() != expected;
                if first {
                    entry.timelines_rotation.resize(expected, 0.0);
                }
                first
            })
            .unwrap_or(false);
        let unkeyed_state = self.unkeyed_state;

        let mut rotate_index = 0usize;
        for (i, timeline) in animation.timelines.iter().enumerate() {
            let timeline_blend =
                if direct || matches!(timeline_mode.get(i), Some(TimelineMode::Subsequent)) {
                    blend
                } else {
                    MixBlend::Setup
                };

            match timeline {
                Timeline::Attachment(t) => {
                    apply_attachment(t, skeleton, time, blend, attachments, unkeyed_state);
                }
                Timeline::Rotate(t) => {
                    if !shortest_rotation && !direct && alpha < 1.0 {
                        if let Some(entry) = self.entry_mut(entry_id) {
                            apply_rotate_mixed(
                                t,
                                skeleton,
                                time,
                                alpha,
                                timeline_blend,
                                entry.timelines_rotation.as_mut_slice(),
                                rotate_index,
                                first_frame,
                            );
                        }
                    } else {
                        apply_rotate(t, skeleton, time, alpha, timeline_blend);
                    }
                    rotate_index += 1;
                }
                Timeline::Translate(t) => apply_translate(t, skeleton, time, alpha, timeline_blend),
                Timeline::Scale(t) => apply_scale(t, skeleton, time, alpha, timeline_blend),
                Timeline::Color(t) => apply_color(t, skeleton, time, alpha, timeline_blend),
                Timeline::DrawOrder(t) => {
                    apply_draw_order(t, skeleton, time, timeline_blend, MixDirection::In);
                }
                Timeline::Event(_) => {}
            }
        }
    }

    /// Applies the "from" side of a cross-fade and returns the mix fraction
    /// the caller scales the "to" side by. Recurses into deeper links first.
    fn apply_mixing_from(&mut self, to_id: EntryId, skeleton: &mut Skeleton, blend: MixBlend) -> f32 {
        let Some(from_id) = self.entry(to_id).and_then(|entry| entry.mixing_from) else {
            return 1.0;
        };
        if self.entry(from_id).and_then(|e| e.mixing_from).is_some() {
            self.apply_mixing_from(from_id, skeleton, blend);
        }

        let (mix_time, mix_duration, interrupt_alpha) = match self.entry(to_id) {
            Some(to) => (to.mix_time, to.mix_duration, to.interrupt_alpha),
            None => return 1.0,
        };

        let Some(from) = self.entry(from_id) else {
            return 1.0;
        };
        let from_animation = from.animation.clone();
        let from_time = from.animation_time();
        let from_looped = from.looped;
        let from_reverse = from.reverse;
        let from_shortest_rotation = from.shortest_rotation;
        let from_mix_blend = from.mix_blend;
        let from_alpha = from.alpha;
        let alpha_attachment_threshold = from.alpha_attachment_threshold;
        let mix_attachment_threshold = from.mix_attachment_threshold;
        let mix_draw_order_threshold = from.mix_draw_order_threshold;

        let mut from_blend = blend;
        let mix = if mix_duration <= 0.0 {
            // Single-frame mix to undo the mixing-from changes.
            if from_blend == MixBlend::First {
                from_blend = MixBlend::Setup;
            }
            1.0
        } else {
            let m = (mix_time / mix_duration).clamp(0.0, 1.0);
            if from_blend != MixBlend::First {
                from_blend = from_mix_blend;
            }
            m
        };

        // Keep applying attachment/draw-order changes from the outgoing
        // animation only while it still dominates.
        let attachments = mix < mix_attachment_threshold;
        let draw_order = mix < mix_draw_order_threshold;
        let alpha_hold = from_alpha * interrupt_alpha;
        let alpha_mix = alpha_hold * (1.0 - mix);

        let mut apply_time = if from_reverse {
            from_animation.duration - from_time
        } else {
            from_time
        };
        if from_looped && from_animation.duration > 0.0 {
            apply_time = apply_time.rem_euclid(from_animation.duration);
        }

        if let Some(from) = self.entry_mut(from_id) {
            from.total_alpha = 0.0;
        }

        if from_blend == MixBlend::Add {
            // Additive layers mix out directly; instant-change timelines have
            // no additive contribution.
            for timeline in from_animation.timelines.iter() {
                match timeline {
                    Timeline::Attachment(_) | Timeline::Event(_) => {}
                    Timeline::Rotate(t) => {
                        apply_rotate(t, skeleton, apply_time, alpha_mix, MixBlend::Add);
                    }
                    Timeline::Translate(t) => {
                        apply_translate(t, skeleton, apply_time, alpha_mix, MixBlend::Add);
                    }
                    Timeline::Scale(t) => {
                        apply_scale(t, skeleton, apply_time, alpha_mix, MixBlend::Add);
                    }
                    Timeline::Color(t) => {
                        apply_color(t, skeleton, apply_time, alpha_mix, MixBlend::Add);
                    }
                    Timeline::DrawOrder(t) => {
                        apply_draw_order(t, skeleton, apply_time, MixBlend::Add, MixDirection::Out);
                    }
                }
            }
        } else {
            let (timeline_mode, timeline_hold_mix) = match self.entry(from_id) {
                Some(e) => (e.timeline_mode.clone(), e.timeline_hold_mix.clone()),
                None => (Vec::new(), Vec::new()),
            };

            let rotate_count = from_animation
                .timelines
                .iter()
                .filter(|t| matches!(t, Timeline::Rotate(_)))
                .count();
            let first_frame = self
                .entry_mut(from_id)
                .map(|entry| {
                    let expected = rotate_count * 2;
                    let first = entry.timelines_rotation.len() != expected;
                    if first {
                        entry.timelines_rotation.resize(expected, 0.0);
                    }
                    first
                })
                .unwrap_or(false);
            let unkeyed_state = self.unkeyed_state;

            let mut rotate_index = 0usize;
            let mut total_alpha = 0.0f32;
            for (i, timeline) in from_animation.timelines.iter().enumerate() {
                let mode = timeline_mode
                    .get(i)
                    .copied()
                    .unwrap_or(TimelineMode::First);
                let (timeline_blend, alpha) = match mode {
                    TimelineMode::Subsequent => {
                        if !draw_order && matches!(timeline, Timeline::DrawOrder(_)) {
                            continue;
                        }
                        (from_blend, alpha_mix)
                    }
                    TimelineMode::First => (MixBlend::Setup, alpha_mix),
                    TimelineMode::HoldSubsequent => (from_blend, alpha_hold),
                    TimelineMode::HoldFirst => (MixBlend::Setup, alpha_hold),
                    TimelineMode::HoldMix => {
                        // Borrow the mix progress of the later chain entry
                        // that no longer keys this property.
                        let factor = timeline_hold_mix
                            .get(i)
                            .copied()
                            .flatten()
                            .and_then(|hold_id| self.entry(hold_id))
                            .map(|hold| {
                                if hold.mix_duration > 0.0 {
                                    (1.0 - hold.mix_time / hold.mix_duration).max(0.0)
                                } else {
                                    0.0
                                }
                            })
                            .unwrap_or(0.0);
                        (MixBlend::Setup, alpha_hold * factor)
                    }
                };
                total_alpha += alpha;

                match timeline {
                    Timeline::Rotate(t) => {
                        if !from_shortest_rotation && alpha < 1.0 {
                            if let Some(entry) = self.entry_mut(from_id) {
                                apply_rotate_mixed(
                                    t,
                                    skeleton,
                                    apply_time,
                                    alpha,
                                    timeline_blend,
                                    entry.timelines_rotation.as_mut_slice(),
                                    rotate_index,
                                    first_frame,
                                );
                            }
                        } else {
                            apply_rotate(t, skeleton, apply_time, alpha, timeline_blend);
                        }
                        rotate_index += 1;
                    }
                    Timeline::Attachment(t) => {
                        let apply = attachments && alpha >= alpha_attachment_threshold;
                        apply_attachment(t, skeleton, apply_time, timeline_blend, apply, unkeyed_state);
                    }
                    Timeline::DrawOrder(t) => {
                        let direction = if draw_order && timeline_blend == MixBlend::Setup {
                            MixDirection::In
                        } else {
                            MixDirection::Out
                        };
                        apply_draw_order(t, skeleton, apply_time, timeline_blend, direction);
                    }
                    Timeline::Translate(t) => {
                        apply_translate(t, skeleton, apply_time, alpha, timeline_blend);
                    }
                    Timeline::Scale(t) => {
                        apply_scale(t, skeleton, apply_time, alpha, timeline_blend);
                    }
                    Timeline::Color(t) => {
                        apply_color(t, skeleton, apply_time, alpha, timeline_blend);
                    }
                    Timeline::Event(_) => {}
                }
            }
            if let Some(from) = self.entry_mut(from_id) {
                from.total_alpha = total_alpha;
            }
        }

        if mix_duration > 0.0 {
            self.queue_events_for(from_id, Some((mix_time, mix_duration)), !from_reverse);
        } else if let Some(from) = self.entry_mut(from_id) {
            let animation_time = from.animation_time();
            from.next_animation_last = animation_time;
            from.next_track_last = from.track_time;
        }

        mix
    }

    /// Emits custom events and the completion notification in temporal order
    /// relative to track wraparound, then snapshots the double buffers.
    fn queue_events_for(
        &mut self,
        entry_id: EntryId,
        mix: Option<(f32, f32)>,
        events_enabled: bool,
    ) {
        let Some(entry) = self.entry(entry_id) else {
            return;
        };
        let animation = entry.animation.clone();
        let animation_start = entry.animation_start;
        let animation_end = entry.animation_end;
        let duration = animation_end - animation_start;
        let animation_time = entry.animation_time();
        let animation_last = entry.animation_last;
        let track_last = entry.track_last;
        let track_time = entry.track_time;
        let looped = entry.looped;
        let event_threshold = entry.event_threshold;

        let can_fire_events = match mix {
            None => true,
            Some((mix_time, mix_duration)) => {
                mix_duration > 0.0
                    && (mix_time / mix_duration).min(1.0) + TIME_EPSILON < event_threshold
            }
        };

        let mut events = std::mem::take(&mut self.events);
        events.clear();
        if events_enabled && can_fire_events {
            if let Some(timeline) = animation.event_timeline() {
                collect_events(
                    timeline,
                    animation_last,
                    animation_time,
                    looped,
                    animation_start,
                    animation_end,
                    &mut events,
                );
            }
        }

        let complete = if looped {
            if duration.abs() <= TIME_EPSILON {
                true
            } else {
                let cycles = (track_time / duration) as i32;
                cycles > 0 && cycles > (track_last / duration) as i32
            }
        } else {
            animation_time + TIME_EPSILON >= animation_end
                && animation_last + TIME_EPSILON < animation_end
        };

        // When a loop wraps, end-of-clip events precede the completion
        // notification and start-of-clip events follow it.
        if complete && duration.abs() > TIME_EPSILON && !events.is_empty() {
            let track_last_wrapped = track_last.rem_euclid(duration);
            let split = events
                .iter()
                .position(|ev| ev.time - animation_start + TIME_EPSILON < track_last_wrapped)
                .unwrap_or(events.len());
            for ev in &events[..split] {
                self.queue.event(entry_id, ev.clone());
            }
            self.queue.complete(entry_id);
            for ev in &events[split..] {
                self.queue.event(entry_id, ev.clone());
            }
        } else {
            for ev in &events {
                self.queue.event(entry_id, ev.clone());
            }
            if complete {
                self.queue.complete(entry_id);
            }
        }
        events.clear();
        self.events = events;

        if let Some(entry) = self.entry_mut(entry_id) {
            entry.next_animation_last = animation_time;
            entry.next_track_last = track_time;
        }
    }

    /// Recomputes hold classification for every mixing chain. Runs once per
    /// apply, only after the topology changed.
    fn recompute_hold_modes(&mut self) {
        self.queue.changed = false;
        self.property_ids.clear();

        let current_ids = self
            .tracks
            .iter()
            .filter_map(|track| track.current)
            .collect::<Vec<_>>();
        for mut entry_id in current_ids {
            // Start from the outermost mixing-from link.
            while let Some(from) = self.entry(entry_id).and_then(|e| e.mixing_from) {
                entry_id = from;
            }
            let mut cursor = Some(entry_id);
            while let Some(id) = cursor {
                let next = self.entry(id).and_then(|e| e.mixing_to);
                // Additive layers never need hold resolution.
                let compute = self
                    .entry(id)
                    .is_some_and(|e| e.mixing_to.is_none() || e.mix_blend != MixBlend::Add);
                if compute {
                    self.compute_hold(id);
                }
                cursor = next;
            }
        }
    }

    /// Inserts the ids, reporting whether all of them were unclaimed.
    fn add_property_ids(&mut self, ids: &[u64]) -> bool {
        let mut all_new = true;
        for id in ids {
            if !self.property_ids.insert(*id) {
                all_new = false;
            }
        }
        all_new
    }

    fn compute_hold(&mut self, entry_id: EntryId) {
        let (animation, to_id) = match self.entry(entry_id) {
            Some(entry) => (entry.animation.clone(), entry.mixing_to),
            None => return,
        };
        let to_hold_previous = to_id
            .and_then(|to| self.entry(to))
            .map(|to| to.hold_previous)
            .unwrap_or(false);

        let count = animation.timelines.len();
        let mut timeline_mode = vec![TimelineMode::First; count];
        let mut timeline_hold_mix: Vec<Option<EntryId>> = vec![None; count];

        if to_id.is_some() && to_hold_previous {
            for (i, timeline) in animation.timelines.iter().enumerate() {
                timeline_mode[i] = if self.add_property_ids(&timeline.property_ids()) {
                    TimelineMode::HoldFirst
                } else {
                    TimelineMode::HoldSubsequent
                };
            }
        } else {
            'outer: for (i, timeline) in animation.timelines.iter().enumerate() {
                let ids = timeline.property_ids();
                if !self.add_property_ids(&ids) {
                    timeline_mode[i] = TimelineMode::Subsequent;
                    continue;
                }
                let Some(to_id) = to_id else {
                    continue;
                };
                let instant = matches!(
                    timeline,
                    Timeline::Attachment(_) | Timeline::DrawOrder(_) | Timeline::Event(_)
                );
                let to_keys_property = self
                    .entry(to_id)
                    .is_some_and(|to| to.animation.has_property(&ids));
                if instant || !to_keys_property {
                    continue;
                }
                // Walk forward for the first later entry that stops keying
                // this property; its mix supplies the hold percentage.
                let mut next = self.entry(to_id).and_then(|e| e.mixing_to);
                while let Some(next_id) = next {
                    let Some(next_entry) = self.entry(next_id) else {
                        break;
                    };
                    if next_entry.animation.has_property(&ids) {
                        next = next_entry.mixing_to;
                        continue;
                    }
                    if next_entry.mix_duration > 0.0 {
                        timeline_mode[i] = TimelineMode::HoldMix;
                        timeline_hold_mix[i] = Some(next_id);
                        continue 'outer;
                    }
                    break;
                }
                timeline_mode[i] = TimelineMode::HoldFirst;
            }
        }

        if let Some(entry) = self.entry_mut(entry_id) {
            entry.timeline_mode = timeline_mode;
            entry.timeline_hold_mix = timeline_hold_mix;
        }
    }

    /// Clears a track, synchronously queueing `end` for the current entry and
    /// every link of its mixing chain.
    pub fn clear_track(&mut self, track_index: usize) {
        self.clear_track_internal(track_index);
        self.drain();
    }

    pub fn clear_tracks(&mut self) {
        let old_drain_disabled = self.queue.drain_disabled;
        self.queue.drain_disabled = true;
        for track_index in 0..self.tracks.len() {
            self.clear_track_internal(track_index);
        }
        self.tracks.clear();
        self.queue.drain_disabled = old_drain_disabled;
        self.drain();
    }

    /// Disposes every entry queued after the given one on its track.
    pub fn clear_next(&mut self, entry: TrackEntryHandle) {
        let Some(track_index) = self.entry(entry.id).map(|e| e.track_index) else {
            return;
        };
        let Some(track) = self.tracks.get_mut(track_index) else {
            return;
        };
        let to_dispose: Vec<EntryId> = if track.current == Some(entry.id) {
            track.queue.drain(..).collect()
        } else if let Some(position) = track.queue.iter().position(|&id| id == entry.id) {
            track.queue.drain(position + 1..).collect()
        } else {
            Vec::new()
        };
        for id in to_dispose {
            self.queue.dispose(id);
        }
        self.drain();
    }

    fn clear_track_internal(&mut self, track_index: usize) {
        if track_index >= self.tracks.len() {
            return;
        }
        let (current, queued) = {
            let track = &mut self.tracks[track_index];
            (track.current.take(), track.queue.drain(..).collect::<Vec<_>>())
        };
        if let Some(current_id) = current {
            trace!("track {track_index}: cleared");
            self.queue.end(current_id);
            for id in &queued {
                self.queue.dispose(*id);
            }
            let mut entry_id = current_id;
            loop {
                let from = self.entry_mut(entry_id).and_then(|entry| {
                    let from = entry.mixing_from;
                    entry.mixing_from = None;
                    entry.mixing_to = None;
                    from
                });
                let Some(from_id) = from else {
                    break;
                };
                self.queue.end(from_id);
                entry_id = from_id;
            }
        } else {
            for id in queued {
                self.queue.dispose(id);
            }
        }
    }

    fn dispose_queued(&mut self, track_index: usize) {
        let queued: Vec<EntryId> = self.tracks[track_index].queue.drain(..).collect();
        for id in queued {
            self.queue.dispose(id);
        }
    }

    fn ensure_track(&mut self, track_index: usize) {
        if track_index >= self.tracks.len() {
            self.tracks.resize_with(track_index + 1, Track::default);
        }
    }

    fn alloc_entry(&mut self, entry: TrackEntry) -> EntryId {
        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.entries[index];
            slot.entry = Some(entry);
            EntryId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.entries.len();
            self.entries.push(EntrySlot {
                generation: 0,
                entry: Some(entry),
            });
            EntryId {
                index,
                generation: 0,
            }
        }
    }

    fn entry(&self, id: EntryId) -> Option<&TrackEntry> {
        let slot = self.entries.get(id.index)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_ref()
    }

    fn entry_mut(&mut self, id: EntryId) -> Option<&mut TrackEntry> {
        let slot = self.entries.get_mut(id.index)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_mut()
    }

    fn free_entry(&mut self, id: EntryId) {
        let Some(slot) = self.entries.get_mut(id.index) else {
            return;
        };
        if slot.generation != id.generation {
            return;
        }
        slot.entry = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_list.push(id.index);
    }

    fn snapshot(&self, id: EntryId) -> TrackEntrySnapshot {
        if let Some(entry) = self.entry(id) {
            let animation_index = (entry.animation_index != EMPTY_ANIMATION_INDEX)
                .then_some(entry.animation_index);
            TrackEntrySnapshot {
                track_index: entry.track_index,
                animation_index,
                animation_name: entry.animation.name.clone(),
                track_time: entry.track_time,
            }
        } else {
            TrackEntrySnapshot {
                track_index: 0,
                animation_index: None,
                animation_name: "<disposed>".to_string(),
                track_time: 0.0,
            }
        }
    }

    /// Delivers queued notifications. A no-op while already draining or while
    /// draining is disabled; records appended by listeners during the drain
    /// are delivered by the same loop.
    fn drain(&mut self) {
        if self.queue.draining || self.queue.drain_disabled {
            return;
        }
        self.queue.draining = true;

        let mut i = 0;
        while i < self.queue.records.len() {
            let QueuedRecord { entry, kind } = self.queue.records[i].clone();
            match kind {
                QueuedKind::Start => self.notify(entry, &AnimationStateEvent::Start),
                QueuedKind::Interrupt => self.notify(entry, &AnimationStateEvent::Interrupt),
                QueuedKind::Complete => self.notify(entry, &AnimationStateEvent::Complete),
                QueuedKind::Event(event) => {
                    self.notify(entry, &AnimationStateEvent::Event(event));
                }
                QueuedKind::End => {
                    // End falls through into dispose: both fire, then the
                    // entry returns to the pool.
                    self.notify(entry, &AnimationStateEvent::End);
                    self.notify(entry, &AnimationStateEvent::Dispose);
                    self.free_entry(entry);
                }
                QueuedKind::Dispose => {
                    self.notify(entry, &AnimationStateEvent::Dispose);
                    self.free_entry(entry);
                }
            }
            i += 1;
        }
        self.queue.records.clear();

        self.queue.draining = false;
    }

    fn notify(&mut self, entry_id: EntryId, event: &AnimationStateEvent) {
        let snapshot = self.snapshot(entry_id);

        if let Some(mut listener) = self.take_entry_listener(entry_id) {
            listener.on_event(self, &snapshot, event);
            self.restore_entry_listener(entry_id, listener);
        }

        let ids: Vec<u64> = self.listeners.iter().map(|slot| slot.id).collect();
        for id in ids {
            let Some(mut listener) = self.take_listener(id) else {
                continue;
            };
            listener.on_event(self, &snapshot, event);
            self.restore_listener(id, listener);
        }
    }

    fn take_entry_listener(&mut self, id: EntryId) -> Option<Box<dyn TrackEntryListener>> {
        self.entry_mut(id).and_then(|entry| entry.listener.take())
    }

    fn restore_entry_listener(&mut self, id: EntryId, listener: Box<dyn TrackEntryListener>) {
        if let Some(entry) = self.entry_mut(id) {
            if entry.listener.is_none() {
                entry.listener = Some(listener);
            }
        }
    }

    fn take_listener(&mut self, id: u64) -> Option<Box<dyn AnimationStateListener>> {
        self.listeners
            .iter_mut()
            .find(|slot| slot.id == id)
            .and_then(|slot| slot.listener.take())
    }

    fn restore_listener(&mut self, id: u64, listener: Box<dyn AnimationStateListener>) {
        // The slot may have been removed by the listener itself; the box is
        // simply dropped then.
        if let Some(slot) = self.listeners.iter_mut().find(|slot| slot.id == id) {
            if slot.listener.is_none() {
                slot.listener = Some(listener);
            }
        }
    }
}
