//! Player facade tests: playback state, loop counting, seek and events

mod helpers;

use helpers::{
    render_until, test_config, wait_until, DemuxScript, StreamSpec, SyntheticCodecProvider,
    SyntheticDemuxer, SETTLE,
};
use hplayer_common::{LoadState, MediaKind, PlaybackState, PlayerConfig, PlayerEvent};
use hplayer_core::Player;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::{self, error::TryRecvError};

fn player_with(specs: Vec<StreamSpec>, config: PlayerConfig) -> (Arc<Player>, Arc<Mutex<DemuxScript>>) {
    let (demuxer, script) = SyntheticDemuxer::new(specs);
    let (provider, _) = SyntheticCodecProvider::new();
    let player = Player::new("synthetic://player", Arc::new(config), Box::new(demuxer), Arc::new(provider));
    (player, script)
}

fn auto_play() -> PlayerConfig {
    PlayerConfig {
        is_auto_play: true,
        ..test_config()
    }
}

fn drain_events(rx: &mut broadcast::Receiver<PlayerEvent>) -> Vec<PlayerEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    events
}

fn play_to_end(player: &Player) {
    render_until(&player.gateway(), SETTLE, || {
        player.playback_state() == PlaybackState::Finished
    })
    .expect("playback never finished");
}

/// Completion recorder for seek calls
fn recorder() -> (Arc<Mutex<Vec<bool>>>, impl FnOnce(bool) + Send + 'static) {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&calls);
    (calls, move |success| sink.lock().push(success))
}

#[test]
fn test_auto_play_runs_to_finished() {
    let (player, _script) = player_with(vec![StreamSpec::audio(20)], auto_play());
    let mut rx = player.subscribe();
    player.prepare().expect("prepare");

    play_to_end(&player);

    assert!(player.is_prepared());
    assert!((player.duration() - 0.4).abs() < 1e-9);
    assert_eq!(player.nominal_frame_rate(), 50);
    assert!(!player.gateway().is_running());

    let events = drain_events(&mut rx);
    assert!(events.iter().any(|e| matches!(e, PlayerEvent::Prepared { .. })));
    assert!(events.iter().all(|e| e.session_id() == player.session_id()));
    let states: Vec<PlaybackState> = events
        .iter()
        .filter_map(|e| match e {
            PlayerEvent::PlaybackStateChanged { state, .. } => Some(*state),
            _ => None,
        })
        .collect();
    assert_eq!(states, vec![PlaybackState::Playing, PlaybackState::Finished]);
    assert!(events.iter().any(|e| matches!(
        e,
        PlayerEvent::TrackFinished {
            kind: MediaKind::Audio,
            all_finished: true,
            ..
        }
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        PlayerEvent::LoadStateChanged {
            state: LoadState::Playable,
            progress: 100,
            ..
        }
    )));

    player.shutdown();
}

#[test]
fn test_play_before_prepare_starts_once_opened() {
    let (player, _script) = player_with(vec![StreamSpec::audio(10)], test_config());
    player.play();
    assert_eq!(player.playback_state(), PlaybackState::Playing);
    assert!(!player.is_prepared());

    player.prepare().expect("prepare");
    play_to_end(&player);
    assert!(player.is_prepared());
}

#[test]
fn test_prepared_player_buffers_without_playing() {
    let (player, _script) = player_with(vec![StreamSpec::audio(50)], test_config());
    player.prepare().expect("prepare");

    assert!(wait_until(SETTLE, || player.load_state() == LoadState::Playable));
    assert_eq!(player.buffering_progress(), 100);
    assert!(player.playable_time() > 0.0);
    assert_eq!(player.playback_state(), PlaybackState::Idle);

    let mut out = vec![1.0f32; 128];
    assert_eq!(player.gateway().fill_audio(&mut out, 2), 0);
    assert!(out.iter().all(|s| *s == 0.0));
}

#[test]
fn test_loop_playback_counts_every_pass() {
    let config = PlayerConfig {
        is_loop_play: true,
        ..auto_play()
    };
    let (player, script) = player_with(vec![StreamSpec::audio(10)], config);
    player.prepare().expect("prepare");

    let rendered = render_until(&player.gateway(), SETTLE, || player.loop_count() >= 3)
        .expect("loop never completed three passes");

    assert!(rendered >= 3 * 10 * 882);
    assert_eq!(player.playback_state(), PlaybackState::Playing);
    assert!(player.source().clock().serial() >= 3);
    assert!(script.lock().end_of_file_count >= 3);
    // Every rewind goes back to the start
    assert!(script.lock().seeks.iter().all(|s| *s == 0.0));
    assert!(player.current_playback_time() < 0.4 + 1e-6);

    player.shutdown();
}

#[test]
fn test_loop_positions_restart_each_pass() {
    let config = PlayerConfig {
        is_loop_play: true,
        ..auto_play()
    };
    let (player, _script) = player_with(vec![StreamSpec::audio(10)], config);
    player.prepare().expect("prepare");
    let gateway = player.gateway();
    let clock = Arc::clone(gateway.clock());

    let mut samples: Vec<(u64, f64)> = Vec::new();
    render_until(&gateway, SETTLE, || {
        samples.push((clock.serial(), clock.position()));
        player.loop_count() >= 2
    })
    .expect("loop never completed two passes");

    // Within a serial the clock never goes backwards
    for pair in samples.windows(2) {
        let ((serial_a, position_a), (serial_b, position_b)) = (pair[0], pair[1]);
        assert!(serial_b >= serial_a);
        if serial_a == serial_b {
            assert!(position_b >= position_a, "{:?}", pair);
        }
    }
    let serials: Vec<u64> = samples.iter().map(|(serial, _)| *serial).collect();
    assert!(serials.contains(&1));
    assert!(samples.iter().all(|(_, position)| *position <= 0.4 + 1e-6));

    player.shutdown();
}

#[test]
fn test_loop_boundary_neither_drops_nor_repeats_units() {
    let config = PlayerConfig {
        is_loop_play: true,
        ..auto_play()
    };
    let (player, _script) = player_with(vec![StreamSpec::audio(10)], config);
    player.prepare().expect("prepare");
    let gateway = player.gateway();

    // (serial, start seconds, sample frames) for every audio frame pulled
    let mut pulled: Vec<(u64, f64, usize)> = Vec::new();
    let deadline = Instant::now() + SETTLE;
    while player.loop_count() < 3 {
        assert!(Instant::now() < deadline, "loop never completed three passes");
        match gateway.get_next_frame(MediaKind::Audio) {
            Some(frame) => {
                gateway.publish_rendered_position(MediaKind::Audio, frame.end_seconds(), frame.serial);
                pulled.push((frame.serial, frame.seconds(), frame.sample_frames()));
            }
            None => std::thread::sleep(Duration::from_millis(1)),
        }
    }

    for serial in 0..3u64 {
        let pass: Vec<&(u64, f64, usize)> = pulled.iter().filter(|(s, _, _)| *s == serial).collect();
        let total: usize = pass.iter().map(|(_, _, frames)| *frames).sum();
        assert_eq!(total, 10 * 882, "pass {} rendered {} sample frames", serial, total);
        assert!(pass[0].1.abs() < 1e-9, "pass {} started at {:.3}s", serial, pass[0].1);
        assert!(pass.windows(2).all(|w| w[1].1 > w[0].1), "pass {} out of order", serial);
    }
    // Serials only move forward across the boundary
    assert!(pulled.windows(2).all(|w| w[1].0 >= w[0].0));

    player.shutdown();
}

#[test]
fn test_seek_completes_once_and_resumes_playing() {
    let (player, _script) = player_with(vec![StreamSpec::audio(50)], auto_play());
    let mut rx = player.subscribe();
    player.prepare().expect("prepare");
    assert!(wait_until(SETTLE, || player.is_prepared()));

    let (calls, completion) = recorder();
    player.seek(0.5, completion);
    assert!(wait_until(SETTLE, || !calls.lock().is_empty()));
    assert_eq!(calls.lock().as_slice(), &[true]);
    assert_eq!(player.playback_state(), PlaybackState::Playing);

    play_to_end(&player);
    assert_eq!(calls.lock().len(), 1);

    let events = drain_events(&mut rx);
    let seeks: Vec<(f64, bool)> = events
        .iter()
        .filter_map(|e| match e {
            PlayerEvent::SeekCompleted { position, success, .. } => Some((*position, *success)),
            _ => None,
        })
        .collect();
    assert_eq!(seeks, vec![(0.5, true)]);
    player.shutdown();
}

#[test]
fn test_seek_without_auto_play_restores_paused_state() {
    let config = PlayerConfig {
        is_seeked_auto_play: false,
        ..test_config()
    };
    let (player, _script) = player_with(vec![StreamSpec::audio(100)], config);
    player.prepare().expect("prepare");
    assert!(wait_until(SETTLE, || player.is_prepared()));
    player.play();
    player.pause();

    let (calls, completion) = recorder();
    player.seek(0.5, completion);
    assert!(wait_until(SETTLE, || !calls.lock().is_empty()));
    assert_eq!(player.playback_state(), PlaybackState::Paused);
    assert!(!player.gateway().is_running());
    player.shutdown();
}

#[test]
fn test_invalid_seek_targets_are_rejected() {
    let (player, script) = player_with(vec![StreamSpec::audio(20)], test_config());
    player.prepare().expect("prepare");
    assert!(wait_until(SETTLE, || player.is_prepared()));

    for target in [-1.0, f64::NAN, f64::INFINITY] {
        let (calls, completion) = recorder();
        player.seek(target, completion);
        assert_eq!(calls.lock().as_slice(), &[false]);
    }
    assert_eq!(player.playback_state(), PlaybackState::Idle);
    assert!(script.lock().seeks.is_empty());
    player.shutdown();
}

#[test]
fn test_seek_past_end_wraps_with_loop_playback() {
    let config = PlayerConfig {
        is_loop_play: true,
        ..test_config()
    };
    let (player, script) = player_with(vec![StreamSpec::audio(20)], config);
    player.prepare().expect("prepare");
    assert!(wait_until(SETTLE, || player.is_prepared()));

    let (calls, completion) = recorder();
    player.seek(5.0, completion);
    assert!(wait_until(SETTLE, || !calls.lock().is_empty()));
    assert_eq!(calls.lock().as_slice(), &[true]);
    assert!(script.lock().seeks.iter().all(|s| *s == 0.0));
    player.shutdown();
}

#[test]
fn test_seek_after_finish_plays_again() {
    let (player, script) = player_with(vec![StreamSpec::audio(20)], auto_play());
    player.prepare().expect("prepare");
    play_to_end(&player);

    let (calls, completion) = recorder();
    player.seek(0.2, completion);
    assert!(wait_until(SETTLE, || !calls.lock().is_empty()));
    assert_eq!(calls.lock().as_slice(), &[true]);
    assert_eq!(player.playback_state(), PlaybackState::Playing);

    play_to_end(&player);
    assert_eq!(script.lock().end_of_file_count, 2);
    player.shutdown();
}

#[test]
fn test_play_after_finish_replays_from_start() {
    let (player, script) = player_with(vec![StreamSpec::audio(20)], auto_play());
    player.prepare().expect("prepare");
    play_to_end(&player);

    player.play();
    assert!(wait_until(SETTLE, || script.lock().seeks == vec![0.0]));
    assert!(wait_until(SETTLE, || player.playback_state() == PlaybackState::Playing));
    play_to_end(&player);
    assert_eq!(script.lock().end_of_file_count, 2);
    player.shutdown();
}

#[test]
fn test_replay_after_finish_moves_the_clock_with_audio() {
    let (player, script) = player_with(vec![StreamSpec::audio(50)], auto_play());
    player.prepare().expect("prepare");
    play_to_end(&player);
    let clock = Arc::clone(player.gateway().clock());
    assert!(clock.is_audio_stalled());

    player.play();
    assert!(wait_until(SETTLE, || script.lock().seeks == vec![0.0]));
    assert!(wait_until(SETTLE, || player.playback_state() == PlaybackState::Playing));
    assert!(!clock.is_audio_stalled());

    render_until(&player.gateway(), SETTLE, || player.current_playback_time() > 0.5)
        .expect("clock never followed audio after replay");
    assert!(!clock.is_audio_stalled());
    assert!(player.current_playback_time() < 1.0 + 1e-6);
    player.shutdown();
}

#[test]
fn test_natural_size_follows_rotation() {
    let mut video = StreamSpec::video(10);
    video.rotation = 90;
    let (player, _script) = player_with(vec![video], test_config());
    player.prepare().expect("prepare");
    assert!(wait_until(SETTLE, || player.is_prepared()));

    assert_eq!(player.natural_size(), (2, 4));
    assert_eq!(player.source().natural_size(), (4, 2));
    assert_eq!(player.nominal_frame_rate(), 25);
    assert!(player.streams(MediaKind::Audio).is_empty());
    player.shutdown();
}

#[test]
fn test_open_failure_stops_the_player() {
    let (player, script) = player_with(vec![StreamSpec::audio(10)], auto_play());
    script.lock().fail_open = true;
    let mut rx = player.subscribe();
    player.prepare().expect("prepare");

    assert!(wait_until(SETTLE, || player.playback_state() == PlaybackState::Stopped));
    assert!(wait_until(SETTLE, || {
        drain_events(&mut rx)
            .iter()
            .any(|e| matches!(e, PlayerEvent::Failed { .. }))
    }));
    assert_eq!(player.load_state(), LoadState::Idle);
    assert!(!player.is_prepared());

    let (calls, completion) = recorder();
    player.seek(0.1, completion);
    assert_eq!(calls.lock().as_slice(), &[false]);
}

#[test]
fn test_select_before_prepare_is_an_error() {
    let (player, _script) = player_with(vec![StreamSpec::audio(10)], test_config());
    assert!(player.select(0).is_err());
}

#[test]
fn test_shutdown_is_idempotent() {
    let (player, script) = player_with(vec![StreamSpec::audio(50)], auto_play());
    player.prepare().expect("prepare");
    assert!(wait_until(SETTLE, || player.is_prepared()));

    player.shutdown();
    player.shutdown();
    assert_eq!(player.playback_state(), PlaybackState::Stopped);
    assert!(script.lock().closed);

    player.play();
    assert_eq!(player.playback_state(), PlaybackState::Stopped);
    let finished = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&finished);
    player.seek(0.0, move |success| {
        assert!(!success);
        counter.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(finished.load(Ordering::SeqCst), 1);
}

#[test]
fn test_dropping_the_player_closes_the_source() {
    let (player, script) = player_with(vec![StreamSpec::audio(50)], test_config());
    player.prepare().expect("prepare");
    assert!(wait_until(SETTLE, || player.is_prepared()));

    drop(player);
    assert!(script.lock().closed);
}
