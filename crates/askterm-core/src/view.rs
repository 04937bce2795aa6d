//! Top-level view state machine.
//!
//! The controller decides which view is active and owns the menu cursor. It
//! never touches the transcript or the engine: in the conversation view it
//! just forwards keys to whoever owns the session.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum View {
    #[default]
    Selection,
    Conversation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuChoice {
    Query,
    Update,
}

impl MenuChoice {
    pub fn all() -> Vec<MenuChoice> {
        vec![MenuChoice::Query, MenuChoice::Update]
    }

    pub fn label(&self) -> &'static str {
        match self {
            MenuChoice::Query => "Query",
            MenuChoice::Update => "Update",
        }
    }
}

/// Key events the controller understands. Anything else arrives as `Other`
/// and is forwarded untouched in the conversation view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Up,
    Down,
    Enter,
    Escape,
    Interrupt,
    Char(char),
    Other,
}

/// What the caller should do with a routed key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Quit,
    Handled,
    /// Conversation view: the key belongs to the input field or submit
    Forward,
}

/// Ordered choices with a wrapping cursor
#[derive(Debug, Clone)]
pub struct Menu {
    choices: Vec<MenuChoice>,
    cursor: usize,
}

impl Default for Menu {
    /// The menu always offers every [`MenuChoice`], so it is never empty.
    fn default() -> Self {
        Self {
            choices: MenuChoice::all(),
            cursor: 0,
        }
    }
}

impl Menu {
    pub fn choices(&self) -> &[MenuChoice] {
        &self.choices
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn selected(&self) -> MenuChoice {
        self.choices[self.cursor]
    }

    pub fn next(&mut self) {
        self.cursor = (self.cursor + 1) % self.choices.len();
    }

    pub fn previous(&mut self) {
        self.cursor = match self.cursor {
            0 => self.choices.len() - 1,
            i => i - 1,
        };
    }
}

#[derive(Debug, Clone, Default)]
pub struct ViewController {
    view: View,
    menu: Menu,
}

impl ViewController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn view(&self) -> View {
        self.view
    }

    pub fn menu(&self) -> &Menu {
        &self.menu
    }

    pub fn route(&mut self, key: Key) -> Route {
        if matches!(key, Key::Escape | Key::Interrupt) {
            return Route::Quit;
        }

        match self.view {
            View::Selection => self.route_selection(key),
            View::Conversation => Route::Forward,
        }
    }

    fn route_selection(&mut self, key: Key) -> Route {
        match key {
            Key::Char('q') => return Route::Quit,
            Key::Up | Key::Char('k') => self.menu.previous(),
            Key::Down | Key::Char('j') => self.menu.next(),
            Key::Enter => self.commit(),
            _ => {}
        }
        Route::Handled
    }

    fn commit(&mut self) {
        match self.menu.selected() {
            MenuChoice::Query => {
                tracing::debug!("entering conversation view");
                self.view = View::Conversation;
            }
            MenuChoice::Update => {
                tracing::debug!("no handler for menu choice 'Update'");
            }
        }
    }
}
