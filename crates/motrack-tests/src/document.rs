//! Document-level editing: clamping, clipboard, track paths and objects.

use motrack_core::Vec2;
use motrack_tracking::track::ClearAction;
use motrack_tracking::{
    ClampEvent, Marker, MarkerState, TrackClipboard, Tracking, TrackingFile, TracksMap,
};
use proptest::prelude::*;

use crate::scene::{H, W};

fn marker_strategy() -> impl Strategy<Value = Marker> {
    (
        0.1f32..0.9,
        0.1f32..0.9,
        0.002f32..0.05,
        0.002f32..0.05,
        -0.1f32..0.1,
        -0.1f32..0.1,
    )
        .prop_map(|(x, y, pattern, search, dx, dy)| {
            let mut marker = Marker::new(1, Vec2::new(x, y), Vec2::splat(pattern), Vec2::splat(search));
            marker.search_min += Vec2::new(dx, dy);
            marker.search_max += Vec2::new(dx, dy);
            marker
        })
}

proptest! {
    #[test]
    fn search_resize_always_covers_pattern(marker in marker_strategy()) {
        let mut marker = marker;
        marker.clamp(ClampEvent::SearchSize);
        let (pat_min, pat_max) = marker.pattern_minmax();
        prop_assert!(marker.search_min.cmple(pat_min).all());
        prop_assert!(marker.search_max.cmpge(pat_max).all());
    }

    #[test]
    fn moved_search_slides_back_over_pattern(marker in marker_strategy()) {
        let mut marker = marker;
        let size = marker.search_max - marker.search_min;
        let (pat_min, pat_max) = marker.pattern_minmax();
        prop_assume!((size - (pat_max - pat_min)).min_element() >= 0.0);

        marker.clamp(ClampEvent::SearchPosition);
        prop_assert!(marker.search_min.cmple(pat_min + 1e-6).all());
        prop_assert!(marker.search_max.cmpge(pat_max - 1e-6).all());
        prop_assert!(((marker.search_max - marker.search_min) - size).abs().max_element() < 1e-5);
    }
}

#[test]
fn clipboard_pastes_into_another_object() {
    let mut doc = Tracking::new();
    let first = doc.add_track(0, Vec2::new(0.3, 0.3), 1, W, H).unwrap();
    doc.add_track(0, Vec2::new(0.6, 0.6), 1, W, H).unwrap();
    doc.objects[0].track_mut(first).unwrap().flags.hidden = true;

    let mut clipboard = TrackClipboard::new();
    clipboard.copy_tracks(&doc.objects[0]);
    assert_eq!(clipboard.len(), 1);

    let object = doc.add_object("Object");
    let pasted = clipboard.paste_tracks(&mut doc.objects[object]);
    let again = clipboard.paste_tracks(&mut doc.objects[object]);
    let obj = &doc.objects[object];
    assert_eq!(obj.track(pasted[0]).unwrap().name, "Track.001");
    assert_eq!(obj.track(again[0]).unwrap().name, "Track.002");
    assert!(!obj.track(pasted[0]).unwrap().flags.use_2d_stab);
    assert!(doc.find_track(pasted[0]).is_some_and(|(index, _)| index == object));
}

#[test]
fn cleared_path_survives_persistence() {
    let mut doc = Tracking::new();
    let id = doc.add_track(0, Vec2::splat(0.5), 1, W, H).unwrap();
    {
        let track = doc.objects[0].track_mut(id).unwrap();
        let first = *track.exact_marker(1).unwrap();
        for frame in 2..=6 {
            track.insert_marker(first.at_frame(frame, MarkerState::Tracked));
        }
        track.clear_path(4, ClearAction::Remained);
    }

    let data = TrackingFile::new(doc.clone()).to_json().unwrap();
    let loaded = TrackingFile::from_json(&data).unwrap().into_tracking();
    let track = loaded.objects[0].track(id).unwrap();
    assert_eq!(track, doc.objects[0].track(id).unwrap());
    assert_eq!(track.enabled_frame_range(), Some((1, 4)));
    assert!(track.exact_marker(5).is_some_and(|m| m.is_disabled()));
}

#[test]
fn deleted_object_comes_back_on_merge() {
    let mut doc = Tracking::new();
    let object = doc.add_object("Prop");
    let id = doc.add_track(object, Vec2::splat(0.4), 1, W, H).unwrap();
    let shared = doc.into_shared();

    let mut map = TracksMap::from_tracks(&shared.read().objects[object], |_| true);
    let marker = *map.track(0).unwrap().exact_marker(1).unwrap();
    map.track_mut(0)
        .unwrap()
        .insert_marker(marker.at_frame(2, MarkerState::Tracked));

    shared.write().delete_object(object).unwrap();
    map.merge_shared(&shared);

    let doc = shared.read();
    let restored = doc.object_by_name("Prop").unwrap();
    assert!(!restored.is_camera);
    assert_eq!(restored.tracks.len(), 1);
    assert_eq!(restored.tracks[0].marker_count(), 2);
    assert_ne!(restored.tracks[0].id, id);
}
