use crate::model::PlayerState;
use crate::player::Player;
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap};
use std::time::Duration;

const APP_TITLE_WITH_VERSION: &str = concat!("captune v", env!("CARGO_PKG_VERSION"), "  ");

/// Interaction state owned by the event loop, not by the player.
#[derive(Debug, Default)]
pub struct ViewState {
    pub selected: usize,
    pub command_mode: bool,
    pub command_buffer: String,
}

#[derive(Clone, Copy)]
struct Palette {
    bg: Color,
    panel_bg: Color,
    panel_alt_bg: Color,
    border: Color,
    text: Color,
    muted: Color,
    accent: Color,
    alert: Color,
    caption: Color,
    selected_bg: Color,
}

const PALETTE: Palette = Palette {
    bg: Color::Rgb(10, 15, 24),
    panel_bg: Color::Rgb(19, 29, 43),
    panel_alt_bg: Color::Rgb(24, 38, 58),
    border: Color::Rgb(69, 121, 176),
    text: Color::Rgb(214, 228, 248),
    muted: Color::Rgb(149, 173, 204),
    accent: Color::Rgb(100, 203, 184),
    alert: Color::Rgb(249, 174, 88),
    caption: Color::Rgb(231, 165, 255),
    selected_bg: Color::Rgb(34, 55, 82),
};

fn vertical_layout(area: Rect) -> std::rc::Rc<[Rect]> {
    Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(4),
            Constraint::Length(3),
            Constraint::Length(3),
        ])
        .split(area)
}

fn body_layout(area: Rect) -> std::rc::Rc<[Rect]> {
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(62), Constraint::Percentage(38)])
        .split(area)
}

/// Where the playlist panel lands for a frame of the given size.
pub fn playlist_rect(area: Rect) -> Rect {
    body_layout(vertical_layout(area)[1])[0]
}

pub fn draw(frame: &mut Frame, player: &Player, view: &ViewState) {
    let colors = PALETTE;
    frame.render_widget(
        Block::default().style(Style::default().bg(colors.bg)),
        frame.area(),
    );

    let vertical = vertical_layout(frame.area());
    draw_header(frame, player, vertical[0], &colors);

    let body = body_layout(vertical[1]);
    draw_playlist(frame, player, view, body[0], &colors);
    draw_now_playing(frame, player, view, body[1], &colors);

    let caption = player.current_subtitle();
    let subtitle = Paragraph::new(Span::styled(
        caption.unwrap_or_default(),
        Style::default()
            .fg(colors.caption)
            .add_modifier(Modifier::BOLD),
    ))
    .alignment(Alignment::Center)
    .block(panel_block(
        "Subtitles",
        colors.panel_alt_bg,
        colors.text,
        colors.border,
    ))
    .wrap(Wrap { trim: true });
    frame.render_widget(subtitle, vertical[2]);

    let timeline = Paragraph::new(Span::styled(
        timeline_line(player, 26, 14),
        Style::default().fg(colors.text),
    ))
    .block(panel_block(
        "Timeline",
        colors.panel_bg,
        colors.text,
        colors.border,
    ));
    frame.render_widget(timeline, vertical[3]);

    let footer = if view.command_mode {
        Paragraph::new(Line::from(vec![
            Span::styled(":", Style::default().fg(colors.accent)),
            Span::styled(
                view.command_buffer.as_str(),
                Style::default().fg(colors.text),
            ),
        ]))
    } else {
        Paragraph::new(Line::from(vec![
            Span::styled(
                "Space play/pause, n/p next/prev, Enter play, . loop, z shuffle, x stop, : command, q quit",
                Style::default().fg(colors.muted),
            ),
            Span::styled("  |  ", Style::default().fg(colors.muted)),
            Span::styled(player.status.as_str(), Style::default().fg(colors.text)),
        ]))
    };
    frame.render_widget(
        footer.block(panel_block(
            "Message",
            colors.panel_bg,
            colors.text,
            colors.border,
        )),
        vertical[4],
    );
}

fn draw_header(frame: &mut Frame, player: &Player, area: Rect, colors: &Palette) {
    let state_color = match player.state() {
        PlayerState::Playing => colors.accent,
        PlayerState::Paused => colors.alert,
        PlayerState::Idle => colors.muted,
    };
    let header = Paragraph::new(Line::from(vec![
        Span::styled(
            APP_TITLE_WITH_VERSION,
            Style::default()
                .fg(colors.accent)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(player.state().label(), Style::default().fg(state_color)),
        Span::styled("  |  ", Style::default().fg(colors.muted)),
        Span::styled(
            format!("Tracks {}", player.files().len()),
            Style::default().fg(colors.text),
        ),
        Span::styled("  |  ", Style::default().fg(colors.muted)),
        mode_span("Loop", player.is_looping(), colors),
        Span::raw(" "),
        mode_span("Shuffle", player.is_shuffling(), colors),
    ]))
    .block(panel_block(
        "Status",
        colors.panel_bg,
        colors.text,
        colors.border,
    ));
    frame.render_widget(header, area);
}

fn mode_span(label: &'static str, enabled: bool, colors: &Palette) -> Span<'static> {
    if enabled {
        Span::styled(
            label,
            Style::default()
                .fg(colors.alert)
                .add_modifier(Modifier::BOLD),
        )
    } else {
        Span::styled(label, Style::default().fg(colors.muted))
    }
}

fn draw_playlist(
    frame: &mut Frame,
    player: &Player,
    view: &ViewState,
    area: Rect,
    colors: &Palette,
) {
    let current = player.current_index();
    let items: Vec<ListItem> = player
        .files()
        .iter()
        .enumerate()
        .map(|(idx, track)| {
            let marker = if current == Some(idx) { "  > " } else { "    " };
            let name_style = if player.playlist().was_played(idx) && current != Some(idx) {
                Style::default().fg(colors.muted)
            } else {
                Style::default().fg(colors.text)
            };
            let mut spans = vec![
                Span::styled(marker, Style::default().fg(colors.accent)),
                Span::styled(format!("{:>3}. ", idx + 1), Style::default().fg(colors.muted)),
                Span::styled(track.name.as_str(), name_style),
            ];
            if track.has_subtitles() {
                spans.push(Span::styled(" [cc]", Style::default().fg(colors.caption)));
            }
            ListItem::new(Line::from(spans))
        })
        .collect();

    let mut state = ListState::default();
    state.select((!player.files().is_empty()).then_some(view.selected));

    let title = match player.directory() {
        Some(directory) if player.is_loading() => {
            format!("Playlist / {} (loading)", directory.display())
        }
        Some(directory) => format!("Playlist / {}", directory.display()),
        None if player.is_loading() => String::from("Playlist (loading)"),
        None => String::from("Playlist"),
    };

    let list = List::new(items)
        .block(panel_block(&title, colors.panel_bg, colors.text, colors.border))
        .highlight_style(
            Style::default()
                .bg(colors.selected_bg)
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("-> ");
    frame.render_stateful_widget(list, area, &mut state);
}

fn draw_now_playing(
    frame: &mut Frame,
    player: &Player,
    view: &ViewState,
    area: Rect,
    colors: &Palette,
) {
    let playlist = player.playlist();
    let now_title = player
        .current_track()
        .map(|track| track.name.clone())
        .unwrap_or_else(|| String::from("-"));
    let position = player
        .current_index()
        .map(|idx| format!("{}/{}", idx + 1, playlist.len()))
        .unwrap_or_else(|| format!("-/{}", playlist.len()));
    let up_next = playlist
        .upcoming()
        .next()
        .and_then(|idx| playlist.files().get(idx))
        .map(|track| track.name.as_str())
        .unwrap_or("-");
    let selected_title = player
        .files()
        .get(view.selected)
        .map(|track| track.name.as_str())
        .unwrap_or("-");

    let info_text = vec![
        Line::from(vec![
            Span::styled(
                "Now",
                Style::default()
                    .fg(colors.accent)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(format!("  {now_title}"), Style::default().fg(colors.text)),
        ]),
        Line::from(Span::styled(
            format!("Track   {position}"),
            Style::default().fg(colors.alert),
        )),
        Line::from(Span::styled(
            format!("Next    {up_next}"),
            Style::default().fg(colors.muted),
        )),
        Line::from(Span::styled(
            format!(
                "Queue   {} ahead, {} behind",
                playlist.upcoming_len(),
                playlist.history().len()
            ),
            Style::default().fg(colors.muted),
        )),
        Line::from(""),
        Line::from(vec![
            Span::styled(
                "Selected",
                Style::default()
                    .fg(colors.accent)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                format!("  {selected_title}"),
                Style::default().fg(colors.text),
            ),
        ]),
        Line::from(Span::styled(
            format!("Output  {}", player.output_name()),
            Style::default().fg(colors.muted),
        )),
    ];
    let info = Paragraph::new(info_text)
        .block(panel_block(
            "Now Playing",
            colors.panel_alt_bg,
            colors.text,
            colors.border,
        ))
        .wrap(Wrap { trim: true });
    frame.render_widget(info, area);
}

fn panel_block(title: &str, bg: Color, text: Color, border: Color) -> Block<'_> {
    Block::default()
        .borders(Borders::ALL)
        .title(Span::styled(
            format!(" {title} "),
            Style::default().fg(text).add_modifier(Modifier::BOLD),
        ))
        .border_style(Style::default().fg(border))
        .style(Style::default().bg(bg))
}

fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let minutes = total_seconds / 60;
    let seconds = total_seconds % 60;
    format!("{minutes:02}:{seconds:02}")
}

fn progress_bar(ratio: Option<f64>, width: usize) -> String {
    let clamped = ratio.unwrap_or(0.0).clamp(0.0, 1.0);
    let filled = (clamped * width as f64).round() as usize;
    let mut bar = String::with_capacity(width + 2);
    bar.push('[');
    bar.push_str(&"#".repeat(filled));
    bar.push_str(&"-".repeat(width.saturating_sub(filled)));
    bar.push(']');
    bar
}

fn timeline_line(player: &Player, timeline_bar_width: usize, volume_bar_width: usize) -> String {
    let elapsed = player.position().unwrap_or(Duration::ZERO);
    let total = player.duration();
    let ratio = total.and_then(|duration| {
        let total_secs = duration.as_secs_f64();
        (total_secs > 0.0).then_some((elapsed.as_secs_f64() / total_secs).clamp(0.0, 1.0))
    });

    let volume = player.volume().clamp(0.0, 1.0);
    format!(
        "{} / {} {}  |  Vol {} {:>3}%",
        format_duration(elapsed),
        total
            .map(format_duration)
            .unwrap_or_else(|| String::from("--:--")),
        progress_bar(ratio, timeline_bar_width),
        progress_bar(Some(f64::from(volume)), volume_bar_width),
        (volume * 100.0).round() as u16
    )
}
