//! Line Commands - Typed at the prompt or piped in as a script

use std::fmt::Write as _;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use nativeaudio_core::{
    pan_slider_to_permille, volume_slider_to_millibel, AssetStore, AudioControl, AudioDevice,
    AudioEngine, Clip, PlayerSettings,
};
use tracing::{info, warn};

/// Asset the `asset` command plays when no name is given
pub const DEFAULT_ASSET: &str = "background.mp3";

/// One parsed line
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    /// Queue a clip on the buffer-queue player
    Clip(Clip),
    Reverb,
    /// Create the asset player (once) and toggle it
    Asset(Option<String>),
    /// Create the URI player from an asset index, asset name, path or URI
    Uri(String),
    Play,
    PauseUri,
    Loop,
    MuteLeft,
    MuteRight,
    SoloLeft,
    SoloRight,
    Mute,
    Stereo,
    Channels,
    /// Volume slider position, 0..=100
    Volume(i32),
    /// Pan slider position, 0..=100
    Pan(i32),
    Record,
    StopRecording,
    Pause,
    Resume,
    Events,
    Devices,
    Assets,
    Status,
    Help,
    Quit,
}

pub const HELP: &str = "\
clips:    hello | android | sawtooth | playback | stop
players:  asset [name] | uri <index|name|path|file://...> | play | pause-uri | loop
channels: mute-left | mute-right | solo-left | solo-right | mute | stereo | channels
sliders:  volume <0-100> | pan <0-100>
effects:  reverb
capture:  record | stop-record
engine:   pause | resume | events | devices | assets | status | help | quit";

fn slider(arg: Option<&str>, name: &str) -> Result<i32> {
    let arg = arg.with_context(|| format!("{} needs a value 0-100", name))?;
    let value: i32 = arg
        .parse()
        .with_context(|| format!("{} is not a number: {}", name, arg))?;
    if !(0..=100).contains(&value) {
        bail!("{} must be within 0-100, got {}", name, value);
    }
    Ok(value)
}

impl FromStr for Input {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            bail!("empty command");
        };
        let arg = words.next();

        let input = match command.to_ascii_lowercase().as_str() {
            "hello" => Input::Clip(Clip::Hello),
            "android" => Input::Clip(Clip::Android),
            "sawtooth" => Input::Clip(Clip::Sawtooth),
            "playback" => Input::Clip(Clip::Playback),
            "stop" => Input::Clip(Clip::None),
            "reverb" => Input::Reverb,
            "asset" => Input::Asset(arg.map(str::to_string)),
            "uri" => Input::Uri(
                arg.context("uri needs an asset index, name, path or file:// URI")?
                    .to_string(),
            ),
            "play" => Input::Play,
            "pause-uri" => Input::PauseUri,
            "loop" => Input::Loop,
            "mute-left" => Input::MuteLeft,
            "mute-right" => Input::MuteRight,
            "solo-left" => Input::SoloLeft,
            "solo-right" => Input::SoloRight,
            "mute" => Input::Mute,
            "stereo" => Input::Stereo,
            "channels" => Input::Channels,
            "volume" => Input::Volume(slider(arg, "volume")?),
            "pan" => Input::Pan(slider(arg, "pan")?),
            "record" => Input::Record,
            "stop-record" => Input::StopRecording,
            "pause" => Input::Pause,
            "resume" => Input::Resume,
            "events" => Input::Events,
            "devices" => Input::Devices,
            "assets" => Input::Assets,
            "status" => Input::Status,
            "help" | "?" => Input::Help,
            "quit" | "exit" | "q" => Input::Quit,
            other => bail!("unknown command '{}' (try 'help')", other),
        };
        Ok(input)
    }
}

/// What the prompt loop does next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Engine plus the settings to save on quit
///
/// Every toggle reads its current value back from the engine's player
/// controls, so a new target player starts from its own flags.
pub struct Session {
    engine: AudioEngine,
    store: AssetStore,
    settings: PlayerSettings,
    settings_path: Option<PathBuf>,
}

impl Session {
    /// Wrap a running engine and restore the saved player settings
    pub fn new(
        engine: AudioEngine,
        store: AssetStore,
        settings: PlayerSettings,
        settings_path: Option<PathBuf>,
    ) -> Self {
        let mut session = Self {
            engine,
            store,
            settings,
            settings_path,
        };
        session.restore();
        session
    }

    pub fn engine(&self) -> &AudioEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut AudioEngine {
        &mut self.engine
    }

    fn restore(&mut self) {
        if self.settings.reverb_enabled {
            self.engine.enable_reverb(true);
        }
        if let Some(uri) = self.settings.last_uri.clone() {
            if self.engine.create_uri_player(&uri) {
                info!("Restored URI player: {}", uri);
            } else {
                warn!("Saved URI no longer playable: {}", uri);
            }
        }
        self.apply_uri_settings();
    }

    /// Push the saved volume and stereo position to the current target
    fn apply_uri_settings(&mut self) {
        self.engine
            .set_volume_uri_player(self.settings.uri_volume_millibel);
        self.engine
            .enable_stereo_position_uri_player(self.settings.stereo_position_enabled);
        self.engine
            .set_stereo_position_uri_player(self.settings.stereo_position_permille);
    }

    /// Map `uri <arg>` to something the URI player accepts
    fn resolve_uri_arg(&self, arg: &str) -> Result<String> {
        if let Ok(index) = arg.parse::<usize>() {
            let assets = self.store.list()?;
            let name = assets
                .get(index)
                .with_context(|| format!("no asset #{} ({} available)", index, assets.len()))?;
            return Ok(self.store.resolve(name)?.display().to_string());
        }
        if arg.contains("://") || PathBuf::from(arg).is_absolute() {
            return Ok(arg.to_string());
        }
        match self.store.resolve(arg) {
            Ok(path) => Ok(path.display().to_string()),
            Err(_) => Ok(arg.to_string()),
        }
    }

    /// Flip one channel bit on the current target, returning the new value
    fn toggle_channel(&mut self, channel: u32, solo: bool) -> Option<bool> {
        let controls = self.engine.uri_target()?.controls();
        let mask = if solo {
            controls.channel_solo_mask()
        } else {
            controls.channel_mute_mask()
        };
        let on = mask & (1 << channel) == 0;
        if solo {
            self.engine.set_channel_solo_uri_player(channel, on);
        } else {
            self.engine.set_channel_mute_uri_player(channel, on);
        }
        Some(on)
    }

    /// Run one command, returning text for the user
    pub fn execute(&mut self, input: Input) -> Result<(Flow, String)> {
        let mut out = String::new();

        match input {
            Input::Clip(clip) => {
                let count = match clip {
                    Clip::Hello => 5,
                    Clip::Android => 7,
                    Clip::Sawtooth => 1,
                    Clip::Playback => 3,
                    Clip::None => 0,
                };
                if self.engine.select_clip(clip, count) {
                    writeln!(out, "{} x{}", clip, count)?;
                } else {
                    writeln!(out, "{} not played (busy, no output or nothing recorded)", clip)?;
                }
            }
            Input::Reverb => {
                let wanted = !self.engine.is_reverb_enabled();
                self.engine.enable_reverb(wanted);
                writeln!(out, "reverb {}", on_off(self.engine.is_reverb_enabled()))?;
            }
            Input::Asset(name) => {
                let name = name.as_deref().unwrap_or(DEFAULT_ASSET);
                if self.engine.create_asset_player(&self.store, name) {
                    let wanted = !self.engine.asset_player().is_some_and(|p| p.is_playing());
                    self.engine.set_playing_asset_player(wanted);
                    let playing = self.engine.asset_player().is_some_and(|p| p.is_playing());
                    writeln!(out, "asset {} {}", name, if playing { "playing" } else { "stopped" })?;
                } else {
                    writeln!(out, "asset {} unavailable", name)?;
                }
            }
            Input::Uri(arg) => {
                let uri = self.resolve_uri_arg(&arg)?;
                if self.engine.create_uri_player(&uri) {
                    self.apply_uri_settings();
                    writeln!(out, "uri player ready: {}", uri)?;
                } else {
                    writeln!(out, "cannot open {}", uri)?;
                }
            }
            Input::Play => {
                self.engine.set_playing_uri_player(true);
                writeln!(out, "uri playing")?;
            }
            Input::PauseUri => {
                self.engine.set_playing_uri_player(false);
                writeln!(out, "uri paused")?;
            }
            Input::Loop => {
                let looping = self.engine.uri_player().map(|p| p.controls().is_looping());
                match looping {
                    Some(looping) => {
                        self.engine.set_looping_uri_player(!looping);
                        writeln!(out, "loop {}", on_off(!looping))?;
                    }
                    None => writeln!(out, "no uri player")?,
                }
            }
            Input::MuteLeft => channel_line(&mut out, "left mute", self.toggle_channel(0, false))?,
            Input::MuteRight => channel_line(&mut out, "right mute", self.toggle_channel(1, false))?,
            Input::SoloLeft => channel_line(&mut out, "left solo", self.toggle_channel(0, true))?,
            Input::SoloRight => channel_line(&mut out, "right solo", self.toggle_channel(1, true))?,
            Input::Mute => {
                let muted = self.engine.uri_target().map(|t| t.controls().is_muted());
                match muted {
                    Some(muted) => {
                        self.engine.set_mute_uri_player(!muted);
                        writeln!(out, "mute {}", on_off(!muted))?;
                    }
                    None => writeln!(out, "no player")?,
                }
            }
            Input::Stereo => {
                let enabled = self.engine.uri_target().map(|t| t.controls().is_pan_enabled());
                match enabled {
                    Some(enabled) => {
                        self.settings.stereo_position_enabled = !enabled;
                        self.engine.enable_stereo_position_uri_player(!enabled);
                        writeln!(out, "stereo position {}", on_off(!enabled))?;
                    }
                    None => writeln!(out, "no player")?,
                }
            }
            Input::Channels => {
                writeln!(out, "channels: {}", self.engine.num_channels_uri_player())?;
            }
            Input::Volume(progress) => {
                let millibel = volume_slider_to_millibel(progress);
                self.settings.uri_volume_millibel = millibel;
                self.engine.set_volume_uri_player(millibel);
                writeln!(out, "volume {} mB", millibel)?;
            }
            Input::Pan(progress) => {
                let permille = pan_slider_to_permille(progress);
                self.settings.stereo_position_permille = permille;
                self.engine.set_stereo_position_uri_player(permille);
                writeln!(out, "stereo position {}", permille)?;
            }
            Input::Record => {
                let started =
                    self.engine.create_audio_recorder() && self.engine.start_recording();
                if started {
                    let seconds = self.engine.config().recorder.max_seconds;
                    writeln!(out, "recording for up to {}s", seconds)?;
                } else {
                    writeln!(out, "recording not started (busy or no input)")?;
                }
            }
            Input::StopRecording => {
                if self.engine.stop_recording() {
                    writeln!(out, "recording stopped")?;
                } else {
                    writeln!(out, "not recording")?;
                }
            }
            Input::Pause => {
                self.engine.pause()?;
                writeln!(out, "engine paused")?;
            }
            Input::Resume => {
                self.engine.resume()?;
                writeln!(out, "engine resumed")?;
            }
            Input::Events => {
                while let Some(event) = self.engine.poll_event() {
                    writeln!(out, "{}", serde_json::to_string(&event)?)?;
                }
            }
            Input::Devices => {
                for device in AudioDevice::enumerate_all()? {
                    writeln!(out, "{}", device)?;
                }
            }
            Input::Assets => {
                for (index, name) in self.store.list()?.iter().enumerate() {
                    writeln!(out, "{:>3}  {}", index, name)?;
                }
            }
            Input::Status => {
                let (left, right) = self.engine.peaks();
                writeln!(out, "state:     {}", self.engine.state().as_str())?;
                if let (Some(rate), Some(frames)) =
                    (self.engine.sample_rate(), self.engine.buffer_frames())
                {
                    writeln!(out, "output:    {}Hz, {} frames", rate, frames)?;
                }
                writeln!(out, "peaks:     {:.3} / {:.3}", left, right)?;
                writeln!(out, "underruns: {}", self.engine.underruns())?;
                writeln!(out, "reverb:    {}", on_off(self.engine.is_reverb_enabled()))?;
                writeln!(out, "clip busy: {}", self.engine.is_clip_in_flight())?;
                writeln!(out, "recording: {}", self.engine.is_recording())?;
                if let Some(recording) = self.engine.latest_recording() {
                    writeln!(out, "recorded:  {:.2}s", recording.duration_secs())?;
                }
                if let Some(uri) = self.engine.uri_player_uri() {
                    writeln!(out, "uri:       {}", uri)?;
                }
                if let Some(status) = self.engine.uri_player().and_then(|p| p.stream_status()) {
                    let stream = if status.has_failed() {
                        "failed"
                    } else if status.is_done() {
                        "decoded"
                    } else {
                        "decoding"
                    };
                    writeln!(out, "stream:    {}, {} underruns", stream, status.underruns())?;
                }
            }
            Input::Help => writeln!(out, "{}", HELP)?,
            Input::Quit => return Ok((Flow::Quit, out)),
        }

        Ok((Flow::Continue, out))
    }

    /// Save settings and shut the engine down
    pub fn finish(mut self) -> Result<()> {
        self.settings.last_uri = self.engine.uri_player_uri().map(str::to_string);
        self.settings.reverb_enabled = self.engine.is_reverb_enabled();
        if let Some(target) = self.engine.uri_target() {
            self.settings.stereo_position_enabled = target.controls().is_pan_enabled();
        }

        if let Some(path) = self.settings_path.as_deref() {
            self.settings
                .save_to(path)
                .with_context(|| format!("saving settings to {}", path.display()))?;
        }
        self.engine.shutdown();
        Ok(())
    }
}

fn channel_line(out: &mut String, what: &str, toggled: Option<bool>) -> Result<()> {
    match toggled {
        Some(on) => writeln!(out, "{} {}", what, on_off(on))?,
        None => writeln!(out, "no player")?,
    }
    Ok(())
}

fn on_off(value: bool) -> &'static str {
    if value {
        "on"
    } else {
        "off"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nativeaudio_core::{EngineConfig, EngineState, OfflineBackend};

    fn session(settings: PlayerSettings, settings_path: Option<PathBuf>) -> Session {
        let backend = OfflineBackend::with_native_params(48000, 256);
        let config = EngineConfig {
            shutdown_timeout_ms: 10,
            ..EngineConfig::default()
        };
        let mut engine = AudioEngine::create(config, Box::new(backend)).unwrap();
        engine.create_buffer_queue_player(0, 0).unwrap();
        Session::new(engine, AssetStore::new("no-such-assets"), settings, settings_path)
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!("hello".parse::<Input>().unwrap(), Input::Clip(Clip::Hello));
        assert_eq!("  Sawtooth ".parse::<Input>().unwrap(), Input::Clip(Clip::Sawtooth));
        assert_eq!("asset".parse::<Input>().unwrap(), Input::Asset(None));
        assert_eq!(
            "asset loop.ogg".parse::<Input>().unwrap(),
            Input::Asset(Some("loop.ogg".to_string()))
        );
        assert_eq!("uri 2".parse::<Input>().unwrap(), Input::Uri("2".to_string()));
        assert_eq!("volume 40".parse::<Input>().unwrap(), Input::Volume(40));
        assert_eq!("pan 0".parse::<Input>().unwrap(), Input::Pan(0));
        assert_eq!("q".parse::<Input>().unwrap(), Input::Quit);
    }

    #[test]
    fn test_parse_errors() {
        assert!("".parse::<Input>().is_err());
        assert!("uri".parse::<Input>().is_err());
        assert!("volume".parse::<Input>().is_err());
        assert!("volume 101".parse::<Input>().is_err());
        assert!("pan -1".parse::<Input>().is_err());
        assert!("pan left".parse::<Input>().is_err());
        assert!("dance".parse::<Input>().is_err());
    }

    #[test]
    fn test_toggles_flip_engine_flags() {
        let mut s = session(PlayerSettings::default(), None);

        s.execute(Input::MuteLeft).unwrap();
        s.execute(Input::SoloRight).unwrap();
        let clip = s.engine().clip_player().unwrap().controls();
        assert_eq!(clip.channel_mute_mask(), 0b01);
        assert_eq!(clip.channel_solo_mask(), 0b10);

        s.execute(Input::MuteLeft).unwrap();
        assert_eq!(s.engine().clip_player().unwrap().controls().channel_mute_mask(), 0);

        let (_, text) = s.execute(Input::Reverb).unwrap();
        assert_eq!(text.trim(), "reverb on");
        assert!(s.engine().is_reverb_enabled());
    }

    fn write_song(path: &std::path::Path) {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 48000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..9600 {
            writer.write_sample(((i % 64) as i16 - 32) * 256).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_toggles_start_from_new_player_flags() {
        let dir = tempfile::tempdir().unwrap();
        let song = dir.path().join("song.wav");
        write_song(&song);
        let mut s = session(PlayerSettings::default(), None);

        let (_, text) = s.execute(Input::Loop).unwrap();
        assert_eq!(text.trim(), "no uri player");
        let (_, text) = s.execute(Input::MuteLeft).unwrap();
        assert_eq!(text.trim(), "left mute on");
        assert_eq!(s.engine().clip_player().unwrap().controls().channel_mute_mask(), 0b01);

        s.execute(Input::Uri(song.display().to_string())).unwrap();
        let uri = s.engine().uri_player().unwrap().controls();
        assert!(!uri.is_looping());
        assert_eq!(uri.channel_mute_mask(), 0);

        let (_, text) = s.execute(Input::Loop).unwrap();
        assert_eq!(text.trim(), "loop on");
        let (_, text) = s.execute(Input::MuteLeft).unwrap();
        assert_eq!(text.trim(), "left mute on");
        let uri = s.engine().uri_player().unwrap().controls();
        assert!(uri.is_looping());
        assert_eq!(uri.channel_mute_mask(), 0b01);

        let (_, text) = s.execute(Input::Status).unwrap();
        assert!(text.contains("stream:"));

        let (_, text) = s.execute(Input::Loop).unwrap();
        assert_eq!(text.trim(), "loop off");
        assert!(!s.engine().uri_player().unwrap().controls().is_looping());
    }

    #[test]
    fn test_reverb_toggle_reads_engine() {
        let mut s = session(PlayerSettings::default(), None);
        assert!(s.engine_mut().enable_reverb(true));
        let (_, text) = s.execute(Input::Reverb).unwrap();
        assert_eq!(text.trim(), "reverb off");
        assert!(!s.engine().is_reverb_enabled());
    }

    #[test]
    fn test_sliders_use_unit_conversion() {
        let mut s = session(PlayerSettings::default(), None);
        s.execute(Input::Volume(0)).unwrap();
        s.execute(Input::Stereo).unwrap();
        s.execute(Input::Pan(100)).unwrap();

        let clip = s.engine().clip_player().unwrap().controls();
        assert_eq!(clip.gain_millibel(), -5000);
        assert!(clip.is_pan_enabled());
        assert_eq!(clip.pan_permille(), 500);
    }

    #[test]
    fn test_clip_busy_and_stop() {
        let mut s = session(PlayerSettings::default(), None);
        let (_, text) = s.execute(Input::Clip(Clip::Hello)).unwrap();
        assert_eq!(text.trim(), "hello x5");
        let (_, text) = s.execute(Input::Clip(Clip::Android)).unwrap();
        assert!(text.contains("not played"));
        s.execute(Input::Clip(Clip::None)).unwrap();
        assert!(!s.engine().is_clip_in_flight());
    }

    #[test]
    fn test_pause_resume_and_quit() {
        let mut s = session(PlayerSettings::default(), None);
        s.execute(Input::Pause).unwrap();
        assert_eq!(s.engine().state(), EngineState::Paused);
        assert!(s.execute(Input::Pause).is_err());
        s.execute(Input::Resume).unwrap();

        let (flow, _) = s.execute(Input::Quit).unwrap();
        assert_eq!(flow, Flow::Quit);
        s.finish().unwrap();
    }

    #[test]
    fn test_settings_restored_and_saved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let saved = PlayerSettings {
            reverb_enabled: true,
            uri_volume_millibel: -1200,
            stereo_position_enabled: true,
            stereo_position_permille: -300,
            ..PlayerSettings::default()
        };

        let mut s = session(saved, Some(path.clone()));
        assert!(s.engine().is_reverb_enabled());
        let clip = s.engine().clip_player().unwrap().controls();
        assert_eq!(clip.gain_millibel(), -1200);
        assert_eq!(clip.pan_permille(), -300);

        s.execute(Input::Volume(50)).unwrap();
        s.finish().unwrap();

        let reloaded = PlayerSettings::load_from(&path);
        assert!(reloaded.reverb_enabled);
        assert_eq!(reloaded.uri_volume_millibel, -2500);
        assert!(reloaded.saved_at.is_some());
    }
}
