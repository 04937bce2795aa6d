use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Paragraph, Wrap},
};
use askterm_core::{ChatRole, View};

use crate::app::App;

const WELCOME: &str = "Welcome to the chat room!\nType a message and press Enter to send.";

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    // Main layout: header, body, footer
    let [header_area, body_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);

    match app.view() {
        View::Selection => render_selection(app, frame, body_area),
        View::Conversation => render_conversation(app, frame, body_area),
    }

    render_footer(app, frame, footer_area);
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let title = Line::from(vec![
        Span::styled(" askterm ", Style::default().fg(Color::Cyan).bold()),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::DarkGray),
        ),
        Span::raw("  "),
        Span::styled(app.session.engine_name(), Style::default().fg(Color::DarkGray)),
    ]);

    frame.render_widget(Paragraph::new(title), area);
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let mode_style = Style::default().bg(Color::Blue).fg(Color::White);
    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);

    let (mode_text, hints) = match app.view() {
        View::Selection => (
            " MENU ",
            vec![
                Span::styled(" j/k ", key_style),
                Span::styled(" move ", label_style),
                Span::styled(" Enter ", key_style),
                Span::styled(" select ", label_style),
                Span::styled(" q ", key_style),
                Span::styled(" quit ", label_style),
            ],
        ),
        View::Conversation => (
            " CHAT ",
            vec![
                Span::styled(" Enter ", key_style),
                Span::styled(" send ", label_style),
                Span::styled(" PgUp/PgDn ", key_style),
                Span::styled(" scroll ", label_style),
                Span::styled(" Esc ", key_style),
                Span::styled(" quit ", label_style),
            ],
        ),
    };

    let mut spans = vec![
        Span::styled(mode_text, mode_style),
        Span::styled(" ", label_style),
    ];
    spans.extend(hints);
    if let Some(notice) = &app.notice {
        spans.push(Span::styled(
            format!("  {notice}"),
            Style::default().bg(Color::Black).fg(Color::Yellow),
        ));
    }

    let footer = Paragraph::new(Line::from(spans)).style(Style::default().bg(Color::Black));
    frame.render_widget(footer, area);
}

fn render_selection(app: &App, frame: &mut Frame, area: Rect) {
    let menu = app.controller.menu();

    let mut lines = vec![
        Line::from(Span::styled(
            "What would you like to do?",
            Style::default().add_modifier(Modifier::BOLD),
        )),
        Line::default(),
    ];
    for (i, choice) in menu.choices().iter().enumerate() {
        let (marker, style) = if i == menu.cursor() {
            ("(•) ", Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
        } else {
            ("( ) ", Style::default())
        };
        lines.push(Line::from(Span::styled(format!("{marker}{}", choice.label()), style)));
    }

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));
    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_conversation(app: &mut App, frame: &mut Frame, area: Rect) {
    let [chat_area, input_area] = Layout::vertical([
        Constraint::Min(0),
        Constraint::Length(3),
    ])
    .areas(area);

    // Store inner dimensions for scroll calculations (minus borders)
    app.transcript_height = chat_area.height.saturating_sub(2);
    app.transcript_width = chat_area.width.saturating_sub(2);
    if app.follow_bottom {
        app.scroll_to_bottom();
    }

    let chat_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .title(" Conversation ");

    let chat = Paragraph::new(transcript_text(app))
        .block(chat_block)
        .wrap(Wrap { trim: false })
        .scroll((app.transcript_scroll, 0));
    frame.render_widget(chat, chat_area);

    render_input(app, frame, input_area);
}

fn transcript_text(app: &App) -> Text<'static> {
    let transcript = app.session.transcript();
    if transcript.is_empty() && !app.session.is_pending() {
        return Text::from(
            WELCOME
                .lines()
                .map(|line| Line::from(Span::styled(line, Style::default().fg(Color::DarkGray))))
                .collect::<Vec<_>>(),
        );
    }

    let mut lines: Vec<Line<'static>> = Vec::new();
    for message in transcript.messages() {
        let label_style = match message.role {
            ChatRole::User => Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            ChatRole::System => Style::default().fg(Color::Magenta).add_modifier(Modifier::BOLD),
        };

        let mut content = message.content.lines();
        let first = content.next().unwrap_or_default().to_string();
        lines.push(Line::from(vec![
            Span::styled(format!("{}: ", message.role.label()), label_style),
            Span::raw(first),
        ]));
        for rest in content {
            lines.push(Line::from(rest.to_string()));
        }
    }

    if app.session.is_pending() {
        // Animated ellipsis: cycles through ".", "..", "..."
        let dots = ".".repeat((app.animation_frame as usize) + 1);
        lines.push(Line::from(Span::styled(
            format!("Thinking{dots}"),
            Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
        )));
    }

    Text::from(lines)
}

fn render_input(app: &App, frame: &mut Frame, area: Rect) {
    let input = &app.input;
    let border_color = if input.is_focused() { Color::Yellow } else { Color::DarkGray };
    let input_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(" Ask ");

    // Horizontal scrolling keeps the cursor visible
    let inner_width = area.width.saturating_sub(2) as usize;
    let scroll_offset = if inner_width == 0 || input.cursor() < inner_width {
        0
    } else {
        input.cursor() - inner_width + 1
    };

    let paragraph = if input.value().is_empty() {
        Paragraph::new(Span::styled(
            input.placeholder().to_string(),
            Style::default().fg(Color::DarkGray),
        ))
    } else {
        let visible_text: String = input
            .value()
            .chars()
            .skip(scroll_offset)
            .take(inner_width)
            .collect();
        Paragraph::new(visible_text).style(Style::default().fg(Color::Cyan))
    };
    frame.render_widget(paragraph.block(input_block), area);

    if input.is_focused() {
        let cursor_x = (input.cursor() - scroll_offset) as u16;
        frame.set_cursor_position((area.x + cursor_x + 1, area.y + 1));
    }
}
