//! Tests for the router / profile manager

use super::*;
use crate::config::LinkConfig;
use crate::midi::sender::tests::RecordingSink;
use crate::midi::{ControlId, DeviceId};
use crate::profile::BindingParams;
use crate::state::{CcMethod, ControlSettings};
use std::time::{Duration, Instant};
use tempfile::TempDir;

struct Harness {
    manager: Arc<ProfileManager>,
    outbound: Arc<OutboundLink>,
    sink: RecordingSink,
}

fn make_test_link() -> LinkConfig {
    LinkConfig {
        max_queue_len: 100_000,
        max_queue_age_ms: 60_000,
        ..LinkConfig::default()
    }
}

fn make_harness(profile: Profile, profiles_dir: Option<PathBuf>) -> Harness {
    let outbound = Arc::new(OutboundLink::new(&make_test_link()));
    let sender = Arc::new(MidiSender::new());
    let sink = RecordingSink::default();
    sender.attach(DeviceId(1), Box::new(sink.clone()));

    let manager = Arc::new(ProfileManager::new(
        Arc::new(profile),
        Arc::new(CommandCatalog::default()),
        ControlStore::new(),
        outbound.clone(),
        sender,
        profiles_dir,
    ));
    Harness {
        manager,
        outbound,
        sink,
    }
}

fn event(message: MidiMessage) -> MidiEvent {
    MidiEvent {
        device: DeviceId(1),
        raw: message.encode(),
        message,
        timestamp: Instant::now(),
    }
}

fn cc(cc: u8, value: u8) -> MidiEvent {
    event(MidiMessage::ControlChange {
        channel: 0,
        cc,
        value,
    })
}

fn inbound(command: &str, param: &str) -> LinkEvent {
    LinkEvent::Message(InboundMessage::parse(&format!("{} {}", command, param)).unwrap())
}

fn profile_with(name: &str, bindings: &[(ControlId, &str)]) -> Profile {
    let profile = Profile::new(name);
    for (control, command) in bindings {
        profile.bind(*control, *command, BindingParams::default());
    }
    profile.mark_saved();
    profile
}

async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[test]
fn test_cc_event_enqueues_one_frame() {
    let h = make_harness(profile_with("p.yaml", &[(ControlId::cc(1, 1, 7), "Exposure")]), None);

    h.manager.route_midi(&cc(7, 64));

    assert_eq!(h.outbound.pending(), vec!["Exposure 64"]);
    assert_eq!(h.manager.controls().get(&ControlId::cc(1, 1, 7)), 64);
}

#[test]
fn test_inbound_value_updates_state_and_sends_feedback() {
    let h = make_harness(profile_with("p.yaml", &[(ControlId::cc(1, 1, 7), "Exposure")]), None);

    h.manager.handle_inbound(&inbound("Exposure", "32"));

    assert_eq!(h.manager.controls().get(&ControlId::cc(1, 1, 7)), 32);
    assert_eq!(*h.sink.writes.lock(), vec![vec![0xB0, 7, 32]]);
    assert!(h.outbound.pending().is_empty());
}

#[test]
fn test_feedback_disabled_or_relative_skips_hardware() {
    let profile = Profile::new("p.yaml");
    profile.bind(ControlId::cc(1, 1, 7), "Exposure", BindingParams::without_feedback());
    profile.bind(ControlId::cc(1, 1, 16), "Contrast", BindingParams::default());
    let h = make_harness(profile, None);
    h.manager.controls().set_settings(
        ControlId::cc(1, 1, 16),
        ControlSettings {
            method: CcMethod::TwosComplement,
            low: 0,
            high: 127,
        },
    );

    h.manager.handle_inbound(&inbound("Exposure", "10"));
    h.manager.handle_inbound(&inbound("Contrast", "20"));

    assert_eq!(h.manager.controls().get(&ControlId::cc(1, 1, 7)), 10);
    assert_eq!(h.manager.controls().get(&ControlId::cc(1, 1, 16)), 20);
    assert!(h.sink.writes.lock().is_empty());
}

#[test]
fn test_pitch_bend_feedback_moves_fader() {
    let h = make_harness(profile_with("p.yaml", &[(ControlId::pitch_bend(1, 2), "Temperature")]), None);

    h.manager.handle_inbound(&inbound("Temperature", "8192"));

    assert_eq!(*h.sink.writes.lock(), vec![vec![0xE1, 0x00, 0x40]]);
}

#[test]
fn test_buttons_send_on_press_only() {
    let h = make_harness(profile_with("p.yaml", &[(ControlId::note(1, 1, 16), "Pick")]), None);

    h.manager.route_midi(&event(MidiMessage::NoteOn {
        channel: 0,
        note: 16,
        velocity: 127,
    }));
    h.manager.route_midi(&event(MidiMessage::NoteOff {
        channel: 0,
        note: 16,
        velocity: 0,
    }));

    assert_eq!(h.outbound.pending(), vec!["Pick 1"]);
    assert_eq!(h.manager.controls().get(&ControlId::note(1, 1, 16)), 0);
}

#[test]
fn test_unbound_control_is_recorded_but_not_sent() {
    let h = make_harness(Profile::new("empty.yaml"), None);

    h.manager.route_midi(&cc(9, 100));
    h.manager.route_midi(&event(MidiMessage::ProgramChange { channel: 0, program: 1 }));

    assert!(h.outbound.pending().is_empty());
    assert_eq!(h.manager.controls().get(&ControlId::cc(1, 1, 9)), 100);
}

#[test]
fn test_unknown_and_non_numeric_inbound_are_ignored() {
    let h = make_harness(profile_with("p.yaml", &[(ControlId::cc(1, 1, 7), "Exposure")]), None);

    h.manager.handle_inbound(&inbound("Dehaze", "5"));
    h.manager.handle_inbound(&inbound("Exposure", "bright"));
    h.manager.handle_inbound(&LinkEvent::Disconnected);

    assert!(h.sink.writes.lock().is_empty());
    assert_eq!(h.manager.controls().get(&ControlId::cc(1, 1, 7)), 0);
}

#[test]
fn test_switch_replaces_bindings_and_bumps_generation() {
    let knob = ControlId::cc(1, 1, 7);
    let h = make_harness(profile_with("old.yaml", &[(knob, "Exposure")]), None);

    h.manager.route_midi(&cc(7, 1));
    let previous = h.manager.switch_to(Arc::new(profile_with("new.yaml", &[(knob, "Contrast")])));
    h.manager.route_midi(&cc(7, 2));

    assert_eq!(previous.name(), "old.yaml");
    assert_eq!(h.manager.current().name(), "new.yaml");
    assert_eq!(h.manager.generation(), 1);
    assert_eq!(h.outbound.pending(), vec!["Exposure 1", "Contrast 2"]);
}

#[test]
fn test_events_during_switch_use_one_profile() {
    let knob = ControlId::cc(1, 1, 7);
    let h = make_harness(profile_with("old.yaml", &[(knob, "Exposure")]), None);
    let events_per_thread = 500;

    let routers: Vec<_> = (0..3)
        .map(|_| {
            let manager = h.manager.clone();
            std::thread::spawn(move || {
                for i in 0..events_per_thread {
                    manager.route_midi(&cc(7, (i % 128) as u8));
                }
            })
        })
        .collect();
    let switcher = {
        let manager = h.manager.clone();
        std::thread::spawn(move || {
            for round in 0..50 {
                let command = if round % 2 == 0 { "Contrast" } else { "Exposure" };
                manager.switch_to(Arc::new(profile_with("p.yaml", &[(knob, command)])));
            }
        })
    };
    for r in routers {
        r.join().unwrap();
    }
    switcher.join().unwrap();

    let sent = h.outbound.pending();
    assert_eq!(sent.len(), 3 * events_per_thread);
    assert!(sent
        .iter()
        .all(|line| line.starts_with("Exposure ") || line.starts_with("Contrast ")));

    // Last switch installed Exposure
    h.manager.route_midi(&cc(7, 99));
    assert_eq!(h.outbound.pending().last().unwrap(), "Exposure 99");
}

#[test]
fn test_profile_names_with_paths_are_refused() {
    let h = make_harness(Profile::new("a.yaml"), Some(PathBuf::from("/tmp/profiles")));
    for name in ["../evil.yaml", "sub/a.yaml", "", "notes.txt"] {
        assert!(matches!(
            h.manager.profile_path(name),
            Err(BridgeError::ProfileNotFound(_))
        ));
    }
    assert!(h.manager.profile_path("b.yaml").is_ok());
}

#[tokio::test]
async fn test_terminate_request_resolves_waiter() {
    let h = make_harness(Profile::new("a.yaml"), None);
    h.manager.handle_inbound(&inbound("Log", "hello from the plugin"));
    h.manager
        .handle_inbound(&LinkEvent::Message(InboundMessage::parse("TerminateApplication").unwrap()));

    tokio::time::timeout(Duration::from_secs(1), h.manager.terminated())
        .await
        .expect("terminate not signalled");
}

async fn write_profiles(dir: &Path) {
    let knob = ControlId::cc(1, 1, 7);
    for (name, command) in [("a.yaml", "Exposure"), ("b.yaml", "Contrast"), ("c.yaml", "Shadows")] {
        profile_with(name, &[(knob, command)])
            .save_file(&dir.join(name))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_profile_switch_commands_cycle_directory() {
    let dir = TempDir::new().unwrap();
    write_profiles(dir.path()).await;

    let start = Profile::load_file(&dir.path().join("a.yaml")).await.unwrap();
    start.bind(ControlId::note(1, 1, 1), "NextPro", BindingParams::default());
    start.mark_saved();
    let h = make_harness(start, Some(dir.path().to_path_buf()));
    let _worker = h.manager.spawn_request_worker().unwrap();
    assert!(h.manager.spawn_request_worker().is_none());

    h.manager.route_midi(&event(MidiMessage::NoteOn {
        channel: 0,
        note: 1,
        velocity: 127,
    }));
    assert!(wait_until(|| h.manager.current().name() == "b.yaml").await);
    assert!(h.outbound.pending().is_empty());

    h.manager.request(ProfileRequest::Previous);
    assert!(wait_until(|| h.manager.current().name() == "a.yaml").await);
    h.manager.request(ProfileRequest::Previous);
    assert!(wait_until(|| h.manager.current().name() == "c.yaml").await);

    h.manager.handle_inbound(&inbound("SwitchProfile", "b.yaml"));
    assert!(wait_until(|| h.manager.current().name() == "b.yaml").await);

    h.manager.route_midi(&cc(7, 5));
    assert_eq!(h.outbound.pending(), vec!["Contrast 5"]);
}

#[tokio::test]
async fn test_switching_saves_dirty_outgoing_profile() {
    let dir = TempDir::new().unwrap();
    write_profiles(dir.path()).await;

    let h = make_harness(
        Profile::load_file(&dir.path().join("a.yaml")).await.unwrap(),
        Some(dir.path().to_path_buf()),
    );
    h.manager
        .current()
        .bind(ControlId::cc(1, 1, 8), "Whites", BindingParams::default());

    h.manager.switch_to_named("b.yaml").await.unwrap();

    let saved = Profile::load_file(&dir.path().join("a.yaml")).await.unwrap();
    assert_eq!(saved.resolve_command("Whites"), Some(ControlId::cc(1, 1, 8)));
    assert!(matches!(
        h.manager.switch_to_named("missing.yaml").await,
        Err(BridgeError::ProfileNotFound(_))
    ));
    assert_eq!(h.manager.current().name(), "b.yaml");
}

#[tokio::test]
async fn test_reload_skips_dirty_profile() {
    let dir = TempDir::new().unwrap();
    write_profiles(dir.path()).await;
    let h = make_harness(
        Profile::load_file(&dir.path().join("a.yaml")).await.unwrap(),
        Some(dir.path().to_path_buf()),
    );

    // External edit
    profile_with("a.yaml", &[(ControlId::cc(1, 1, 7), "Dehaze")])
        .save_file(&dir.path().join("a.yaml"))
        .await
        .unwrap();

    assert!(!h.manager.reload_if_active("b.yaml").await.unwrap());
    assert!(h.manager.reload_if_active("a.yaml").await.unwrap());
    assert_eq!(h.manager.current().resolve_command("Dehaze"), Some(ControlId::cc(1, 1, 7)));

    h.manager
        .current()
        .bind(ControlId::cc(1, 1, 9), "Blacks", BindingParams::default());
    assert!(!h.manager.reload_if_active("a.yaml").await.unwrap());
    assert!(h.manager.current().resolve_command("Blacks").is_some());
}

#[tokio::test]
async fn test_reload_ignores_our_own_save() {
    let dir = TempDir::new().unwrap();
    write_profiles(dir.path()).await;
    let h = make_harness(
        Profile::load_file(&dir.path().join("a.yaml")).await.unwrap(),
        Some(dir.path().to_path_buf()),
    );

    let handle = h.manager.current();
    handle.bind(ControlId::cc(1, 1, 9), "Blacks", BindingParams::default());
    h.manager.save_active().await.unwrap();
    assert!(!handle.is_dirty());

    assert!(!h.manager.reload_if_active("a.yaml").await.unwrap());
    assert!(Arc::ptr_eq(&handle, &h.manager.current()));
    assert_eq!(h.manager.generation(), 0);

    // Edits on the held handle still route
    handle.bind(ControlId::cc(1, 1, 10), "Whites", BindingParams::default());
    h.manager.route_midi(&cc(10, 5));
    assert_eq!(h.outbound.pending(), vec!["Whites 5"]);
}

#[test]
fn test_swap_only_replaces_clean_expected_profile() {
    let h = make_harness(profile_with("a.yaml", &[]), None);
    let a = h.manager.current();
    let b = Arc::new(profile_with("b.yaml", &[]));

    a.bind(ControlId::cc(1, 1, 7), "Exposure", BindingParams::default());
    assert!(!h.manager.replace_if_clean(&a, b.clone()));
    assert!(Arc::ptr_eq(&a, &h.manager.current()));

    a.mark_saved();
    let stale = Arc::new(profile_with("stale.yaml", &[]));
    assert!(!h.manager.replace_if_clean(&stale, b.clone()));

    assert!(h.manager.replace_if_clean(&a, b.clone()));
    assert!(Arc::ptr_eq(&b, &h.manager.current()));
    assert_eq!(h.manager.generation(), 1);
}
