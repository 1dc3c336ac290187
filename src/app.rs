use crate::audio::{NullBackend, PlaybackBackend, RodioBackend};
use crate::config;
use crate::library::DirectoryScanner;
use crate::player::{Player, PlayerCommand};
use crate::playlist::Playlist;
use crate::ui::{self, ViewState};
use anyhow::Result;
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers, MouseEvent, MouseEventKind,
};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::prelude::Rect;
use std::io::stdout;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const HELP_TEXT: &str = "Commands: load <dir> | play <n> | volume <0-100> | help";

#[derive(Debug, Default)]
pub struct AppOptions {
    pub directory: Option<PathBuf>,
    pub null_audio: bool,
    pub recursive: bool,
    pub seed: Option<u64>,
}

pub fn run(options: AppOptions) -> Result<()> {
    let mut settings = config::load_settings()?;

    let backend: Box<dyn PlaybackBackend> = if options.null_audio {
        Box::new(NullBackend::new())
    } else {
        match RodioBackend::new() {
            Ok(backend) => Box::new(backend),
            Err(err) => {
                warn!(error = %err, "no audio output, falling back to silent playback");
                Box::new(NullBackend::new())
            }
        }
    };
    let playlist = match options.seed.or(settings.shuffle_seed) {
        Some(seed) => Playlist::seeded(seed),
        None => Playlist::new(),
    };
    let scanner = DirectoryScanner::new(options.recursive || settings.recursive_scan);
    let mut player = Player::new(playlist, backend, Arc::new(scanner)).with_settings(&settings);
    info!(output = %player.output_name(), "player ready");

    if let Some(directory) = options.directory.or_else(|| settings.last_directory.clone()) {
        let outcome = player_load(&mut player, &directory);
        report(&mut player, outcome);
    }

    enable_raw_mode()?;
    let mut out = stdout();
    execute!(out, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(out);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;

    let mut view = ViewState::default();
    let mut last_tick = Instant::now();
    let mut last_caption = player.subtitle_revision();
    let mut playlist_rect = Rect::default();

    let result: Result<()> = loop {
        player.pump();
        clamp_selection(&mut view, player.files().len());

        let caption = player.subtitle_revision();
        if caption != last_caption {
            last_caption = caption;
            player.dirty = true;
        }

        if player.dirty || last_tick.elapsed() > Duration::from_millis(250) {
            terminal.draw(|frame| {
                playlist_rect = ui::playlist_rect(frame.area());
                ui::draw(frame, &player, &view)
            })?;
            player.dirty = false;
            last_tick = Instant::now();
        }

        if !event::poll(Duration::from_millis(33))? {
            continue;
        }

        match event::read()? {
            Event::Mouse(mouse) => handle_mouse(&mut player, &mut view, mouse, playlist_rect),
            Event::Key(key) if key.kind == KeyEventKind::Press => {
                if handle_key(&mut player, &mut view, key) {
                    break Ok(());
                }
            }
            Event::Resize(..) => player.dirty = true,
            _ => {}
        }
    };

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    settings.volume = player.volume();
    if let Some(directory) = player.directory() {
        settings.last_directory = Some(config::normalize_path(directory));
    }
    drop(player);
    let save_result = config::save_settings(&settings);
    result?;
    save_result?;
    Ok(())
}

fn player_load(player: &mut Player, directory: &Path) -> crate::error::Result<()> {
    player.dispatch(PlayerCommand::Load(directory.to_path_buf()))
}

fn report(player: &mut Player, outcome: crate::error::Result<()>) {
    if let Err(err) = outcome {
        warn!(error = %err, "command failed");
        player.status = format!("error: {err}");
        player.dirty = true;
    }
}

fn clamp_selection(view: &mut ViewState, len: usize) {
    view.selected = view.selected.min(len.saturating_sub(1));
}

/// Returns `true` when the user asked to quit.
fn handle_key(player: &mut Player, view: &mut ViewState, key: KeyEvent) -> bool {
    if view.command_mode {
        match key.code {
            KeyCode::Esc => {
                view.command_mode = false;
                view.command_buffer.clear();
            }
            KeyCode::Enter => {
                let input = std::mem::take(&mut view.command_buffer);
                view.command_mode = false;
                run_command(player, view, &input);
            }
            KeyCode::Backspace => {
                view.command_buffer.pop();
            }
            KeyCode::Char(ch) => view.command_buffer.push(ch),
            _ => {}
        }
        player.dirty = true;
        return false;
    }

    let command = match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => return true,
        KeyCode::Char('q') => return true,
        KeyCode::Down => {
            view.selected = view.selected.saturating_add(1);
            clamp_selection(view, player.files().len());
            player.dirty = true;
            return false;
        }
        KeyCode::Up => {
            view.selected = view.selected.saturating_sub(1);
            player.dirty = true;
            return false;
        }
        KeyCode::Char(':') => {
            view.command_mode = true;
            player.dirty = true;
            return false;
        }
        KeyCode::Enter if !player.files().is_empty() => PlayerCommand::PlayAt(view.selected),
        KeyCode::Char(' ') => PlayerCommand::TogglePlayPause,
        KeyCode::Char('n') => PlayerCommand::Next,
        KeyCode::Char('p') => PlayerCommand::Previous,
        KeyCode::Char('.') => PlayerCommand::ToggleLoop,
        KeyCode::Char('z') => PlayerCommand::ToggleShuffle,
        KeyCode::Char('x') => PlayerCommand::Stop,
        KeyCode::Char('+') | KeyCode::Char('=') => PlayerCommand::IncreaseVolume,
        KeyCode::Char('-') => PlayerCommand::DecreaseVolume,
        _ => return false,
    };
    let outcome = player.dispatch(command);
    report(player, outcome);
    false
}

fn handle_mouse(player: &mut Player, view: &mut ViewState, mouse: MouseEvent, playlist_rect: Rect) {
    if !point_in_rect(mouse.column, mouse.row, playlist_rect) {
        return;
    }
    match mouse.kind {
        MouseEventKind::ScrollDown => {
            view.selected = view.selected.saturating_add(1);
            clamp_selection(view, player.files().len());
        }
        MouseEventKind::ScrollUp => view.selected = view.selected.saturating_sub(1),
        _ => return,
    }
    player.dirty = true;
}

fn point_in_rect(x: u16, y: u16, rect: Rect) -> bool {
    if rect.width == 0 || rect.height == 0 {
        return false;
    }
    x >= rect.x
        && x < rect.x.saturating_add(rect.width)
        && y >= rect.y
        && y < rect.y.saturating_add(rect.height)
}

fn run_command(player: &mut Player, view: &mut ViewState, raw: &str) {
    let input = raw.trim();
    if input.is_empty() {
        player.status = String::from("No command");
        player.dirty = true;
        return;
    }

    let mut command_split = input.splitn(2, char::is_whitespace);
    let command = command_split.next().unwrap_or_default();
    let rest = command_split.next().unwrap_or("").trim();

    match command {
        "help" => {
            player.status = String::from(HELP_TEXT);
            player.dirty = true;
        }
        "load" => {
            if rest.is_empty() {
                player.status = String::from("Usage: load <dir>");
                player.dirty = true;
                return;
            }
            let outcome = player_load(player, Path::new(rest));
            report(player, outcome);
            view.selected = 0;
        }
        "play" => {
            let Ok(number) = rest.parse::<usize>() else {
                player.status = String::from("Usage: play <n>");
                player.dirty = true;
                return;
            };
            let Some(index) = number.checked_sub(1) else {
                player.status = String::from("Track numbers start at 1");
                player.dirty = true;
                return;
            };
            let outcome = player.dispatch(PlayerCommand::PlayAt(index));
            if outcome.is_ok() {
                view.selected = index;
            }
            report(player, outcome);
        }
        "volume" => {
            let Ok(percent) = rest.parse::<u16>() else {
                player.status = String::from("Usage: volume <0-100>");
                player.dirty = true;
                return;
            };
            let outcome = player.dispatch(PlayerCommand::SetVolume(f32::from(percent) / 100.0));
            report(player, outcome);
        }
        _ => {
            player.status = String::from("Unknown command. Use :help");
            player.dirty = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScanError;
    use crate::library::FileScanner;
    use crate::model::{PlayerState, Track};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FixedScanner {
        tracks: Vec<Track>,
        requested: Mutex<Vec<PathBuf>>,
    }

    impl FileScanner for FixedScanner {
        fn scan(&self, directory: &Path) -> std::result::Result<Vec<Track>, ScanError> {
            if let Ok(mut requested) = self.requested.lock() {
                requested.push(directory.to_path_buf());
            }
            Ok(self.tracks.clone())
        }
    }

    fn player_with(count: usize) -> (Player, Arc<FixedScanner>) {
        let scanner = Arc::new(FixedScanner {
            tracks: (0..count)
                .map(|idx| Track::new(format!("/music/{idx}.mp3"), format!("song {idx}")))
                .collect(),
            ..FixedScanner::default()
        });
        let mut player = Player::new(
            Playlist::seeded(3),
            Box::new(NullBackend::new()),
            Arc::clone(&scanner) as Arc<dyn FileScanner>,
        );
        if count > 0 {
            player.load_directory("/music").expect("load");
            assert!(player.wait_for_load(Duration::from_secs(2)).expect("scan"));
        }
        (player, scanner)
    }

    fn press(player: &mut Player, view: &mut ViewState, code: KeyCode) -> bool {
        handle_key(player, view, KeyEvent::new(code, KeyModifiers::NONE))
    }

    #[test]
    fn unknown_command_is_reported() {
        let (mut player, _) = player_with(0);
        let mut view = ViewState::default();
        run_command(&mut player, &mut view, "wat");
        assert!(player.status.contains("Unknown command"));
    }

    #[test]
    fn load_command_accepts_paths_with_spaces() {
        let (mut player, scanner) = player_with(0);
        let mut view = ViewState::default();
        run_command(&mut player, &mut view, "load /home/me/Music Folder");
        assert!(player.wait_for_load(Duration::from_secs(2)).expect("scan"));

        let requested = scanner.requested.lock().expect("lock");
        assert_eq!(requested.as_slice(), [PathBuf::from("/home/me/Music Folder")]);
    }

    #[test]
    fn play_command_is_one_based() {
        let (mut player, _) = player_with(3);
        let mut view = ViewState::default();

        run_command(&mut player, &mut view, "play 3");
        assert_eq!(player.current_index(), Some(2));
        assert_eq!(view.selected, 2);

        run_command(&mut player, &mut view, "play 0");
        assert_eq!(player.status, "Track numbers start at 1");

        run_command(&mut player, &mut view, "play 9");
        assert!(player.status.contains("out of range"));
        assert_eq!(player.current_index(), Some(2));
    }

    #[test]
    fn volume_command_sets_percentage() {
        let (mut player, _) = player_with(1);
        let mut view = ViewState::default();
        run_command(&mut player, &mut view, "volume 40");
        assert!((player.volume() - 0.4).abs() < 1e-6);
        run_command(&mut player, &mut view, "volume loud");
        assert_eq!(player.status, "Usage: volume <0-100>");
    }

    #[test]
    fn keys_drive_navigation_and_modes() {
        let (mut player, _) = player_with(3);
        let mut view = ViewState::default();

        assert!(!press(&mut player, &mut view, KeyCode::Char('n')));
        assert_eq!(player.current_index(), Some(1));
        press(&mut player, &mut view, KeyCode::Char('p'));
        assert_eq!(player.current_index(), Some(0));

        press(&mut player, &mut view, KeyCode::Char('.'));
        assert!(player.is_looping());
        press(&mut player, &mut view, KeyCode::Char('z'));
        assert!(player.is_shuffling());

        press(&mut player, &mut view, KeyCode::Char(' '));
        assert_eq!(player.state(), PlayerState::Paused);

        press(&mut player, &mut view, KeyCode::Down);
        press(&mut player, &mut view, KeyCode::Down);
        press(&mut player, &mut view, KeyCode::Down);
        assert_eq!(view.selected, 2);
        press(&mut player, &mut view, KeyCode::Enter);
        assert_eq!(player.current_index(), Some(2));
        assert_eq!(player.state(), PlayerState::Playing);

        assert!(press(&mut player, &mut view, KeyCode::Char('q')));
    }

    #[test]
    fn command_mode_collects_input() {
        let (mut player, _) = player_with(0);
        let mut view = ViewState::default();
        press(&mut player, &mut view, KeyCode::Char(':'));
        for ch in "help".chars() {
            press(&mut player, &mut view, KeyCode::Char(ch));
        }
        assert_eq!(view.command_buffer, "help");
        press(&mut player, &mut view, KeyCode::Enter);
        assert!(!view.command_mode);
        assert_eq!(player.status, HELP_TEXT);
    }

    #[test]
    fn ctrl_c_quits_but_plain_c_does_not() {
        let (mut player, _) = player_with(0);
        let mut view = ViewState::default();
        assert!(!press(&mut player, &mut view, KeyCode::Char('c')));
        assert!(handle_key(
            &mut player,
            &mut view,
            KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL)
        ));
    }
}
