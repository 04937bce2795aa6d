use askterm_core::{
    Config, ConversationSession, ProcessEngine, Resolution, Submission, View, ViewController,
};

use crate::input::TextInput;

pub struct App {
    // Core state
    pub should_quit: bool,
    pub controller: ViewController,
    pub session: ConversationSession,
    pub input: TextInput,

    // Transcript viewport
    pub transcript_scroll: u16,
    pub transcript_height: u16, // inner height, updated during render
    pub transcript_width: u16,  // inner width, updated during render
    pub follow_bottom: bool,

    // Status line
    pub notice: Option<String>,

    // Animation state
    pub animation_frame: u8, // 0-2 for ellipsis animation
}

impl App {
    pub fn new(config: &Config) -> Self {
        let session = ConversationSession::new(ProcessEngine::from_config(config))
            .with_timeout(config.timeout());
        Self::with_session(session, config)
    }

    pub fn with_session(session: ConversationSession, config: &Config) -> Self {
        Self {
            should_quit: false,
            controller: ViewController::new(),
            session,
            input: TextInput::new(config.char_limit, config.placeholder.clone()),

            transcript_scroll: 0,
            transcript_height: 0,
            transcript_width: 0,
            follow_bottom: true,

            notice: None,
            animation_frame: 0,
        }
    }

    pub fn view(&self) -> View {
        self.controller.view()
    }

    /// Send whatever is in the input field to the session
    pub fn submit(&mut self) {
        match self.session.submit(self.input.value()) {
            Submission::Dispatched => {
                self.input.reset();
                self.input.blur();
                self.notice = None;
                self.follow_bottom = true;
            }
            Submission::LaunchFailed => {
                self.input.reset();
                self.notice = Some("Engine failed to start".to_string());
                self.follow_bottom = true;
            }
            Submission::Busy => {
                self.notice = Some("Still waiting on the previous answer".to_string());
            }
            Submission::Blank => {}
        }
    }

    pub fn on_resolution(&mut self, resolution: Resolution) {
        self.follow_bottom = true;
        match resolution {
            Resolution::Output => {}
            Resolution::Completed => {
                self.input.focus();
            }
            Resolution::TimedOut => {
                self.input.focus();
                self.notice = Some(format!(
                    "No answer within {}s, question cancelled",
                    self.session.timeout().as_secs()
                ));
            }
        }
    }

    /// Tick animation frame (called by Tick event)
    pub fn tick_animation(&mut self) {
        if self.session.is_pending() {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }

    pub fn scroll_up(&mut self, lines: u16) {
        self.follow_bottom = false;
        self.transcript_scroll = self.transcript_scroll.saturating_sub(lines);
    }

    pub fn scroll_down(&mut self, lines: u16) {
        let max = self.max_scroll();
        self.transcript_scroll = self.transcript_scroll.saturating_add(lines).min(max);
        self.follow_bottom = self.transcript_scroll == max;
    }

    pub fn page_size(&self) -> u16 {
        self.transcript_height.max(1)
    }

    pub fn scroll_to_bottom(&mut self) {
        self.transcript_scroll = self.max_scroll();
    }

    fn max_scroll(&self) -> u16 {
        let visible_height = if self.transcript_height > 0 {
            self.transcript_height
        } else {
            20
        };
        self.total_transcript_lines().saturating_sub(visible_height)
    }

    /// Wrapped line count of the transcript at the current width
    fn total_transcript_lines(&self) -> u16 {
        // Default to 50 columns until the first render reports the real width
        let wrap_width = if self.transcript_width > 0 {
            self.transcript_width as usize
        } else {
            50
        };

        let mut total_lines: u16 = 0;
        for message in self.session.transcript().messages() {
            for line in message.render().lines() {
                // Use character count, not byte length, for proper UTF-8 handling
                let char_count = line.chars().count();
                let wrapped = if char_count == 0 { 1 } else { char_count.div_ceil(wrap_width) };
                total_lines = total_lines.saturating_add(wrapped as u16);
            }
        }

        if self.session.is_pending() {
            total_lines = total_lines.saturating_add(1);
        }
        total_lines
    }

    /// Cancel any in-flight engine run before the terminal is torn down
    pub fn shutdown(&mut self) {
        self.session.cancel();
    }
}
