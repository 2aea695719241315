use ratatui::Frame;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table, TableState, Wrap};
use serde_json::Value;

use crate::app::{App, InputMode};
use crate::injection::{FOOTER, HEADER, Injection};
use crate::model::{ColumnDef, namespace_label};
use crate::screens::{DetailKind, DetailScreen, ListScreen, Screen};

const BG: Color = Color::Rgb(9, 15, 25);
const PANEL: Color = Color::Rgb(16, 27, 44);
const ACCENT: Color = Color::Rgb(52, 211, 153);
const MUTED: Color = Color::Rgb(140, 156, 178);
const WARN: Color = Color::Rgb(251, 191, 36);
const ERROR: Color = Color::Rgb(248, 113, 113);
const PL_A: Color = Color::Rgb(17, 94, 89);
const PL_B: Color = Color::Rgb(30, 64, 175);
const PL_C: Color = Color::Rgb(55, 48, 163);
const PL_D: Color = Color::Rgb(82, 24, 124);
const MARKED: Color = Color::Rgb(125, 211, 252);

pub fn render(frame: &mut Frame, app: &App) {
    let footer_widgets = app.api().injections().render(FOOTER);
    let root = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Min(6),
            Constraint::Length(u16::from(!footer_widgets.is_empty())),
            Constraint::Length(1),
        ])
        .split(frame.area());

    render_header(frame, root[0], app);
    render_tab_bar(frame, root[1], app);
    render_body(frame, root[2], app);
    if !footer_widgets.is_empty() {
        render_footer_widgets(frame, root[3], &footer_widgets);
    }
    render_status_line(frame, root[4], app);

    if let Some(popup) = app.popup() {
        render_popup(frame, &popup.title, &popup.message);
    }
    if app.show_help() {
        render_help_modal(frame, app);
    }
}

fn render_header(frame: &mut Frame, area: Rect, app: &App) {
    let header = app.header();
    let mut spans = Vec::new();
    push_powerline_segment(&mut spans, " ⎈ kubeboard ", Color::Black, ACCENT, PL_A);
    push_powerline_segment(
        &mut spans,
        format!(" 󰠳 {} ", compact_text(&header.context, 28)),
        Color::White,
        PL_A,
        PL_B,
    );
    push_powerline_segment(
        &mut spans,
        format!(" 󰉖 {} ", compact_text(namespace_label(&header.namespace), 24)),
        Color::White,
        PL_B,
        BG,
    );

    for injection in app.api().injections().render(HEADER) {
        let content = injection.component.content();
        if content.trim().is_empty() {
            continue;
        }
        spans.push(Span::raw(" "));
        spans.push(Span::styled(content, injection_style(&injection)));
    }

    let left = Paragraph::new(Line::from(spans)).style(Style::default().bg(BG).fg(Color::White));
    let refreshed = app
        .tabs()
        .active_screen()
        .and_then(Screen::as_list)
        .and_then(ListScreen::last_refresh);
    let Some(refreshed) = refreshed else {
        frame.render_widget(left, area);
        return;
    };

    let right = format!("󰑓 {refreshed} ");
    let right_width = right.chars().count() as u16;
    if right_width >= area.width {
        frame.render_widget(left, area);
        return;
    }
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(1), Constraint::Length(right_width)])
        .split(area);
    frame.render_widget(left, chunks[0]);
    frame.render_widget(
        Paragraph::new(right)
            .style(Style::default().bg(BG).fg(MUTED))
            .alignment(Alignment::Right),
        chunks[1],
    );
}

fn render_tab_bar(frame: &mut Frame, area: Rect, app: &App) {
    let tabs = app.tabs();
    let mut spans = Vec::new();
    let count = tabs.len();
    for (index, tab) in tabs.tabs().iter().enumerate() {
        let active = index == tabs.active_index();
        let bg = if active { PL_C } else { Color::Rgb(30, 41, 59) };
        let next_bg = if index + 1 == count { BG } else { Color::Rgb(30, 41, 59) };
        let next_bg = if index + 1 == tabs.active_index() { PL_C } else { next_bg };
        push_powerline_segment(
            &mut spans,
            format!(" {} {} ", index + 1, compact_text(&tab.title(), 24)),
            if active { Color::White } else { MUTED },
            bg,
            next_bg,
        );
    }

    if let Some(tab) = tabs.active() {
        spans.push(Span::raw("  "));
        let crumbs = tab.breadcrumb();
        let last = crumbs.len().saturating_sub(1);
        for (index, crumb) in crumbs.into_iter().enumerate() {
            if index > 0 {
                spans.push(Span::styled(" › ", Style::default().fg(MUTED)));
            }
            let style = if index == last {
                Style::default().fg(ACCENT).add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(MUTED)
            };
            spans.push(Span::styled(crumb, style));
        }
        if tab.can_go_forward() {
            spans.push(Span::styled(" ›…", Style::default().fg(MUTED)));
        }
    }

    frame.render_widget(
        Paragraph::new(Line::from(spans)).style(Style::default().bg(BG)),
        area,
    );
}

fn render_body(frame: &mut Frame, area: Rect, app: &App) {
    match app.tabs().active_screen() {
        Some(Screen::List(list)) => render_list(frame, area, list.inner()),
        Some(Screen::Detail(detail)) => render_detail(frame, area, detail),
        None => frame.render_widget(
            Paragraph::new("No tabs open").block(panel_block("kubeboard".to_string(), MUTED)),
            area,
        ),
    }
}

fn render_list(frame: &mut Frame, area: Rect, list: &ListScreen) {
    let info = list.info();
    let visible_rows = list.visible_rows();
    let mut title = format!("{} {} ({})", info.icon, list.crumb(), visible_rows.len());
    if visible_rows.len() != list.total_rows() {
        title.push_str(&format!(" of {}", list.total_rows()));
    }
    if !list.filter().is_empty() {
        title.push_str(&format!(" /{}", list.filter()));
    }
    if list.mark_count() > 0 {
        title.push_str(&format!(" [{} marked]", list.mark_count()));
    }
    if list.is_loading() {
        title.push_str(" ⟳");
    }

    if let Some(error) = list.error()
        && visible_rows.is_empty()
    {
        let panel = Paragraph::new(Text::from(error.to_string()))
            .wrap(Wrap { trim: false })
            .block(panel_block(format!("{title} Error"), ERROR))
            .style(Style::default().fg(ERROR));
        frame.render_widget(panel, area);
        return;
    }

    let (table_area, error_area) = match list.error() {
        Some(_) => {
            let chunks = Layout::default()
                .direction(Direction::Vertical)
                .constraints([Constraint::Min(3), Constraint::Length(1)])
                .split(area);
            (chunks[0], Some(chunks[1]))
        }
        None => (area, None),
    };

    let header_row = Row::new(info.columns.iter().map(|column| {
        Cell::from(column.title.clone()).style(Style::default().add_modifier(Modifier::BOLD))
    }))
    .height(1)
    .style(Style::default().fg(ACCENT));

    let rows = visible_rows.iter().map(|row| {
        let style = if list.is_marked(row) {
            Style::default().fg(MARKED).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::White)
        };
        Row::new(row.columns.iter().cloned().map(Cell::from)).style(style)
    });

    let table = Table::new(rows, column_constraints(&info.columns))
        .header(header_row)
        .block(panel_block(title, ACCENT))
        .column_spacing(1)
        .row_highlight_style(
            Style::default()
                .bg(Color::Rgb(24, 36, 58))
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("󰜴 ");

    let mut state = TableState::default();
    state.select(list.selected_index());
    frame.render_stateful_widget(table, table_area, &mut state);

    if let (Some(error), Some(error_area)) = (list.error(), error_area) {
        frame.render_widget(
            Paragraph::new(format!(" 󰅚 {error}")).style(Style::default().fg(ERROR).bg(BG)),
            error_area,
        );
    }
}

fn render_detail(frame: &mut Frame, area: Rect, detail: &DetailScreen) {
    let mut title = detail.title();
    if detail.is_loading() {
        title.push_str(" ⟳");
    }

    if let Some(error) = detail.error()
        && detail.text().is_empty()
    {
        let panel = Paragraph::new(Text::from(error.to_string()))
            .wrap(Wrap { trim: false })
            .block(panel_block(format!("{title} Error"), ERROR))
            .style(Style::default().fg(ERROR));
        frame.render_widget(panel, area);
        return;
    }

    let text = match detail.mode() {
        DetailKind::Describe => highlight_structured_text(detail.text()),
        DetailKind::Logs => Text::from(detail.text().to_string()),
    };
    let paragraph = Paragraph::new(text)
        .block(panel_block(title, ACCENT))
        .style(Style::default().fg(Color::White))
        .scroll((detail.scroll(), 0));

    frame.render_widget(paragraph, area);
}

fn render_footer_widgets(frame: &mut Frame, area: Rect, widgets: &[Injection]) {
    let mut spans = Vec::new();
    for (index, injection) in widgets.iter().enumerate() {
        if index > 0 {
            spans.push(Span::styled(" │ ", Style::default().fg(MUTED)));
        }
        spans.push(Span::styled(
            injection.component.content(),
            injection_style(injection),
        ));
    }
    frame.render_widget(
        Paragraph::new(Line::from(spans)).style(Style::default().bg(BG)),
        area,
    );
}

fn render_status_line(frame: &mut Frame, area: Rect, app: &App) {
    if matches!(app.mode(), InputMode::Normal) {
        let pending = app.pending_confirmation_prompt();
        let status_text = pending
            .map(|prompt| format!("{prompt} (y/n)"))
            .unwrap_or_else(|| app.status().to_string());
        let (status_fg, status_bg) = if pending.is_some() {
            (Color::Black, WARN)
        } else {
            (Color::White, PL_B)
        };

        let mut spans = Vec::new();
        push_powerline_segment(&mut spans, " 󰘳 nrm ", Color::White, PL_A, status_bg);
        let width_hint = area.width.saturating_sub(12).max(24) as usize;
        push_powerline_segment(
            &mut spans,
            format!(
                " {} {} ",
                footer_status_icon(&status_text),
                compact_text(&status_text, width_hint)
            ),
            status_fg,
            status_bg,
            BG,
        );
        if pending.is_none()
            && let Some(key) = app.bindings().key_for(crate::input::Action::ToggleHelp)
        {
            spans.push(Span::styled(
                format!("  {key} help"),
                Style::default().fg(MUTED),
            ));
        }
        frame.render_widget(
            Paragraph::new(Line::from(spans)).style(Style::default().bg(BG)),
            area,
        );
        return;
    }

    let (label, prompt, prompt_bg) = match app.mode() {
        InputMode::Filter => (" 󰈲 flt ", format!("/{}", app.input()), WARN),
        _ => (" 󰘳 cmd ", format!(":{}", app.input()), ACCENT),
    };

    let mut spans = Vec::new();
    push_powerline_segment(&mut spans, label, Color::Black, prompt_bg, PL_D);
    push_powerline_segment(&mut spans, format!(" {prompt} "), Color::White, PL_D, BG);

    let completions = app.completion_candidates();
    if !completions.is_empty() {
        let selected = app
            .completion_index()
            .min(completions.len().saturating_sub(1));
        let start = selected.saturating_sub(2);
        let available_width = area.width as usize;
        let mut used_width = spans_width(&spans) + 1;
        spans.push(Span::raw(" "));
        if start > 0 {
            spans.push(Span::styled("… ", Style::default().fg(MUTED)));
            used_width += 2;
        }
        for (index, item) in completions.iter().enumerate().skip(start) {
            let chunk = format!("{item} ");
            let chunk_width = chunk.chars().count();
            if used_width + chunk_width + 1 > available_width {
                spans.push(Span::styled("…", Style::default().fg(MUTED)));
                break;
            }
            let style = if index == selected {
                Style::default()
                    .fg(Color::Black)
                    .bg(Color::Rgb(94, 234, 212))
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(MUTED)
            };
            spans.push(Span::styled(chunk, style));
            used_width += chunk_width;
        }
    }

    frame.render_widget(
        Paragraph::new(Line::from(spans)).style(Style::default().bg(BG)),
        area,
    );
}

fn render_popup(frame: &mut Frame, title: &str, message: &str) {
    let area = centered_rect(64, 40, frame.area());
    frame.render_widget(Clear, area);
    let mut lines = message.lines().map(Line::from).collect::<Vec<_>>();
    lines.push(Line::from(""));
    lines.push(Line::styled("esc / enter to dismiss", Style::default().fg(MUTED)));
    let popup = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(
            Block::default()
                .title(format!(" {title} "))
                .borders(Borders::ALL)
                .border_style(Style::default().fg(ERROR))
                .style(Style::default().bg(PANEL)),
        )
        .style(Style::default().fg(Color::White));
    frame.render_widget(popup, area);
}

fn render_help_modal(frame: &mut Frame, app: &App) {
    let area = centered_rect(70, 72, frame.area());
    frame.render_widget(Clear, area);

    let mut lines = vec![
        Line::from(format!(
            "kubeboard help  context:{}  namespace:{}",
            app.header().context,
            namespace_label(&app.header().namespace)
        )),
        Line::from(""),
    ];
    let entries = app.bindings().help_entries();
    for pair in entries.chunks(2) {
        let cells = pair
            .iter()
            .map(|(name, key)| format!("{key:>10}  {name:<14}"))
            .collect::<Vec<_>>()
            .join("  ");
        lines.push(Line::from(cells));
    }
    lines.push(Line::from("         1-9  activate tab"));
    lines.push(Line::from(""));
    lines.push(Line::styled(
        "Quick-nav: <kind> | ns <name|all> | ctx <name> | run <command> [args] | q",
        Style::default().fg(MUTED),
    ));

    let commands = app.api().commands().list();
    if !commands.is_empty() {
        lines.push(Line::from(""));
        lines.push(Line::styled(
            "Plugin commands",
            Style::default().fg(ACCENT).add_modifier(Modifier::BOLD),
        ));
        for (name, description) in commands {
            lines.push(Line::from(format!("  {name:<16} {description}")));
        }
    }

    let modal = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(panel_block("Help".to_string(), ACCENT))
        .style(Style::default().fg(Color::White));

    frame.render_widget(modal, area);
}

fn panel_block(title: String, border: Color) -> Block<'static> {
    Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border))
        .style(Style::default().bg(PANEL))
}

fn injection_style(injection: &Injection) -> Style {
    let color = injection
        .component
        .color()
        .and_then(|color| color.parse::<Color>().ok())
        .unwrap_or(Color::White);
    Style::default().fg(color).bg(BG)
}

fn footer_status_icon(status_text: &str) -> &'static str {
    let status = status_text.to_ascii_lowercase();
    let has_failure = [
        "failed",
        "error",
        "timed out",
        "unreachable",
        "refused",
        "forbidden",
        "denied",
        "unknown",
    ]
    .iter()
    .any(|needle| status.contains(needle));
    if has_failure { "󰅚" } else { "󰄬" }
}

fn highlight_structured_text(input: &str) -> Text<'static> {
    let trimmed = input.trim_start();
    if (trimmed.starts_with('{') || trimmed.starts_with('['))
        && let Ok(value) = serde_json::from_str::<Value>(trimmed)
        && let Ok(pretty) = serde_yaml::to_string(&value)
    {
        return highlight_yaml_text(&pretty);
    }
    highlight_yaml_text(input)
}

fn highlight_yaml_text(input: &str) -> Text<'static> {
    let lines = input
        .lines()
        .map(highlight_yaml_line)
        .collect::<Vec<Line<'static>>>();
    Text::from(lines)
}

fn highlight_yaml_line(line: &str) -> Line<'static> {
    let indent_len = line
        .as_bytes()
        .iter()
        .take_while(|byte| **byte == b' ' || **byte == b'\t')
        .count();
    let indent = &line[..indent_len];
    let trimmed = &line[indent_len..];

    let mut spans = vec![Span::raw(indent.to_string())];
    if trimmed.is_empty() {
        return Line::from(spans);
    }

    if let Some(comment) = trimmed.strip_prefix('#') {
        spans.push(Span::styled(
            format!("#{comment}"),
            Style::default().fg(MUTED),
        ));
        return Line::from(spans);
    }

    if let Some(rest) = trimmed.strip_prefix("- ") {
        spans.push(Span::styled("- ", Style::default().fg(ACCENT)));
        spans.extend(highlight_yaml_content(rest));
        return Line::from(spans);
    }

    spans.extend(highlight_yaml_content(trimmed));
    Line::from(spans)
}

fn highlight_yaml_content(content: &str) -> Vec<Span<'static>> {
    let Some((key, value)) = split_yaml_key_value(content) else {
        return vec![Span::styled(
            content.to_string(),
            Style::default().fg(Color::White),
        )];
    };

    let mut spans = vec![
        Span::styled(
            key.to_string(),
            Style::default().fg(Color::Rgb(103, 232, 249)),
        ),
        Span::styled(":", Style::default().fg(MUTED)),
    ];
    if value.trim().is_empty() {
        return spans;
    }

    spans.push(Span::raw(" "));
    spans.push(Span::styled(
        value.trim_start().to_string(),
        Style::default().fg(yaml_value_color(value.trim())),
    ));
    spans
}

fn split_yaml_key_value(content: &str) -> Option<(&str, &str)> {
    let (key, value) = content.split_once(':')?;
    let key = key.trim_end();
    if key.is_empty() || key.contains(' ') {
        return None;
    }
    Some((key, value))
}

fn yaml_value_color(value: &str) -> Color {
    if value.starts_with('"') || value.starts_with('\'') {
        Color::Rgb(125, 211, 252)
    } else if matches!(value, "true" | "false" | "null" | "~") {
        WARN
    } else if value.parse::<f64>().is_ok() {
        Color::Rgb(251, 146, 60)
    } else if value.starts_with('{') || value.starts_with('[') {
        MUTED
    } else {
        Color::Rgb(147, 197, 253)
    }
}

fn push_powerline_segment(
    spans: &mut Vec<Span<'static>>,
    content: impl Into<String>,
    fg: Color,
    bg: Color,
    next_bg: Color,
) {
    spans.push(Span::styled(
        content.into(),
        Style::default().fg(fg).bg(bg).add_modifier(Modifier::BOLD),
    ));
    spans.push(Span::styled("", Style::default().fg(bg).bg(next_bg)));
}

fn spans_width(spans: &[Span<'_>]) -> usize {
    spans.iter().map(|span| span.content.chars().count()).sum()
}

fn compact_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }

    if max_chars <= 1 {
        return "…".to_string();
    }

    let mut out = value
        .chars()
        .take(max_chars.saturating_sub(1))
        .collect::<String>();
    out.push('…');
    out
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

/// Declared widths are honoured; width 0 shares what is left.
fn column_constraints(columns: &[ColumnDef]) -> Vec<Constraint> {
    if columns.is_empty() {
        return vec![Constraint::Percentage(100)];
    }

    columns
        .iter()
        .map(|column| match column.width {
            0 => Constraint::Fill(1),
            width => Constraint::Length(width),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{column_constraints, compact_text, render};
    use crate::app::{App, Header, Msg};
    use crate::injection::{Component, Injection};
    use crate::input::{Action, KeyBindings};
    use crate::k8s::testing::FakeCluster;
    use crate::model::{ColumnDef, ResourceRow};
    use crate::plugin::PluginApi;
    use crate::registry::ResourceRegistry;
    use crate::screens::Screen;
    use ratatui::Terminal;
    use ratatui::backend::TestBackend;
    use ratatui::layout::Constraint;
    use std::sync::Arc;
    use std::time::Duration;

    fn screen_text(app: &App) -> String {
        let mut terminal = Terminal::new(TestBackend::new(120, 30)).expect("terminal");
        terminal.draw(|frame| render(frame, app)).expect("draw");
        terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|cell| cell.symbol())
            .collect()
    }

    #[tokio::test]
    async fn renders_rows_injections_and_breadcrumb() {
        let api = Arc::new(PluginApi::new(
            Arc::new(ResourceRegistry::new(Duration::from_secs(5))),
            Arc::new(FakeCluster::new()),
            tokio::runtime::Handle::current(),
            "shop",
        ));
        api.injections().add(Injection {
            location: "header".to_string(),
            priority: 0,
            component: Component::text("build 42"),
            source: "test".to_string(),
        });
        api.injections().add(Injection {
            location: "footer".to_string(),
            priority: 0,
            component: Component::text("queue: 3"),
            source: "test".to_string(),
        });

        let mut app = App::new(
            api,
            KeyBindings::default(),
            Header {
                context: "kind-dev".to_string(),
                namespace: "shop".to_string(),
                contexts: Vec::new(),
            },
        );
        app.start("po");
        let screen = app.tabs().active_screen().map(Screen::id).expect("screen");
        app.update(Msg::Rows {
            screen,
            result: Ok(vec![ResourceRow::new(
                "api-0",
                Some("shop".to_string()),
                ["shop", "api-0", "1/1", "Running", "0", "1m"]
                    .map(str::to_string)
                    .to_vec(),
            )]),
        });

        let text = screen_text(&app);
        assert!(text.contains("kind-dev"));
        assert!(text.contains("build 42"));
        assert!(text.contains("queue: 3"));
        assert!(text.contains("api-0"));
        assert!(text.contains("Restarts"));

        app.update(Msg::Action(Action::ToggleHelp));
        assert!(screen_text(&app).contains("toggle_mark"));
    }

    #[test]
    fn declared_widths_are_fixed_and_zero_widths_fill() {
        let columns = [ColumnDef::new("Name", 20), ColumnDef::new("Status", 0)];
        assert_eq!(
            column_constraints(&columns),
            vec![Constraint::Length(20), Constraint::Fill(1)]
        );
        assert_eq!(column_constraints(&[]), vec![Constraint::Percentage(100)]);
    }

    #[test]
    fn compact_text_marks_truncation() {
        assert_eq!(compact_text("deployment", 6), "deplo…");
        assert_eq!(compact_text("pod", 6), "pod");
    }
}
