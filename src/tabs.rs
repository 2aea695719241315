use crate::app::AppCommand;
use crate::input::Action;
use crate::screens::{Screen, ScreenId};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct TabId(u64);

/// A screen together with the breadcrumb label it was pushed under.
#[derive(Debug)]
pub struct Frame {
    pub crumb: String,
    pub screen: Screen,
}

/// One independent navigation context.
#[derive(Debug)]
pub struct Tab {
    id: TabId,
    kind: String,
    stack: Vec<Frame>,
    forward: Vec<Frame>,
}

impl Tab {
    pub fn id(&self) -> TabId {
        self.id
    }

    /// Kind of the root screen; new tabs open on the active tab's kind.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn breadcrumb(&self) -> Vec<String> {
        self.stack.iter().map(|frame| frame.crumb.clone()).collect()
    }

    pub fn title(&self) -> String {
        self.top()
            .map(Screen::crumb)
            .unwrap_or_else(|| self.kind.clone())
    }

    pub fn top(&self) -> Option<&Screen> {
        self.stack.last().map(|frame| &frame.screen)
    }

    pub fn top_mut(&mut self) -> Option<&mut Screen> {
        self.stack.last_mut().map(|frame| &mut frame.screen)
    }

    pub fn can_go_forward(&self) -> bool {
        !self.forward.is_empty()
    }

    fn start_top(&mut self) -> AppCommand {
        self.top_mut().map(Screen::start).unwrap_or(AppCommand::None)
    }

    fn stop_top(&mut self) {
        if let Some(screen) = self.top_mut() {
            screen.stop();
        }
    }
}

/// Outcome of a navigation key that the tab manager claimed.
#[derive(Debug, PartialEq)]
pub enum Route {
    Handled(AppCommand),
    /// Open a fresh tab; the caller builds its root screen.
    NewTab,
    Quit,
}

/// Tabs, the active tab, and each tab's screen stack.
///
/// Only the top screen of the active tab is running. Every transition stops
/// the screen losing visibility before starting the one gaining it.
#[derive(Debug, Default)]
pub struct TabManager {
    tabs: Vec<Tab>,
    active: usize,
    next_id: u64,
    viewport: (u16, u16),
}

impl TabManager {
    pub fn len(&self) -> usize {
        self.tabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }

    pub fn tabs(&self) -> &[Tab] {
        &self.tabs
    }

    pub fn active_index(&self) -> usize {
        self.active
    }

    pub fn active(&self) -> Option<&Tab> {
        self.tabs.get(self.active)
    }

    pub fn active_mut(&mut self) -> Option<&mut Tab> {
        self.tabs.get_mut(self.active)
    }

    pub fn active_screen(&self) -> Option<&Screen> {
        self.active().and_then(Tab::top)
    }

    pub fn active_screen_mut(&mut self) -> Option<&mut Screen> {
        self.active_mut().and_then(Tab::top_mut)
    }

    /// Opens a tab rooted at `screen` and makes it active.
    pub fn open(
        &mut self,
        kind: impl Into<String>,
        crumb: impl Into<String>,
        mut screen: Screen,
    ) -> (TabId, AppCommand) {
        if let Some(tab) = self.active_mut() {
            tab.stop_top();
        }
        self.next_id += 1;
        let id = TabId(self.next_id);
        let (width, height) = self.viewport;
        if height > 0 {
            screen.resize(width, height);
        }
        self.tabs.push(Tab {
            id,
            kind: kind.into(),
            stack: vec![Frame {
                crumb: crumb.into(),
                screen,
            }],
            forward: Vec::new(),
        });
        self.active = self.tabs.len() - 1;
        (id, self.start_active())
    }

    /// Closing the last remaining tab does nothing.
    pub fn close(&mut self, id: TabId) -> AppCommand {
        if self.tabs.len() <= 1 {
            return AppCommand::None;
        }
        let Some(index) = self.tabs.iter().position(|tab| tab.id == id) else {
            return AppCommand::None;
        };
        let mut closed = self.tabs.remove(index);
        for frame in closed.stack.iter_mut() {
            frame.screen.stop();
        }

        match index.cmp(&self.active) {
            Ordering::Less => {
                self.active -= 1;
                AppCommand::None
            }
            Ordering::Equal => {
                self.active = index.min(self.tabs.len() - 1);
                self.start_active()
            }
            Ordering::Greater => AppCommand::None,
        }
    }

    pub fn close_active(&mut self) -> AppCommand {
        match self.active() {
            Some(tab) => self.close(tab.id),
            None => AppCommand::None,
        }
    }

    pub fn activate(&mut self, index: usize) -> AppCommand {
        if index >= self.tabs.len() || index == self.active {
            return AppCommand::None;
        }
        if let Some(tab) = self.active_mut() {
            tab.stop_top();
        }
        self.active = index;
        self.start_active()
    }

    pub fn next(&mut self) -> AppCommand {
        if self.tabs.len() < 2 {
            return AppCommand::None;
        }
        self.activate((self.active + 1) % self.tabs.len())
    }

    pub fn previous(&mut self) -> AppCommand {
        if self.tabs.len() < 2 {
            return AppCommand::None;
        }
        self.activate((self.active + self.tabs.len() - 1) % self.tabs.len())
    }

    /// Pushes onto the active tab. Any forward history is dropped.
    pub fn push(&mut self, mut screen: Screen, crumb: impl Into<String>) -> AppCommand {
        let (width, height) = self.viewport;
        if height > 0 {
            screen.resize(width, height);
        }
        let Some(tab) = self.active_mut() else {
            return AppCommand::None;
        };
        tab.stop_top();
        tab.forward.clear();
        tab.stack.push(Frame {
            crumb: crumb.into(),
            screen,
        });
        tab.start_top()
    }

    /// Pops the active tab's top screen. A tab never loses its root.
    pub fn pop(&mut self) -> AppCommand {
        let Some(tab) = self.active_mut() else {
            return AppCommand::None;
        };
        if tab.stack.len() <= 1 {
            return AppCommand::None;
        }
        let Some(mut frame) = tab.stack.pop() else {
            return AppCommand::None;
        };
        frame.screen.stop();
        tab.forward.push(frame);
        tab.start_top()
    }

    pub fn forward(&mut self) -> AppCommand {
        let Some(tab) = self.active_mut() else {
            return AppCommand::None;
        };
        let Some(frame) = tab.forward.pop() else {
            return AppCommand::None;
        };
        tab.stop_top();
        tab.stack.push(frame);
        tab.start_top()
    }

    /// Live screens only: popped screens waiting in forward history never
    /// receive results, which is what discards late completions.
    pub fn find_screen_mut(&mut self, id: ScreenId) -> Option<&mut Screen> {
        self.tabs
            .iter_mut()
            .flat_map(|tab| tab.stack.iter_mut())
            .map(|frame| &mut frame.screen)
            .find(|screen| screen.id() == id)
    }

    #[cfg(test)]
    pub fn is_live(&self, id: ScreenId) -> bool {
        self.tabs
            .iter()
            .flat_map(|tab| tab.stack.iter())
            .any(|frame| frame.screen.id() == id)
    }

    pub fn resize_all(&mut self, width: u16, height: u16) {
        self.viewport = (width, height);
        for tab in self.tabs.iter_mut() {
            for frame in tab.stack.iter_mut().chain(tab.forward.iter_mut()) {
                frame.screen.resize(width, height);
            }
        }
    }

    /// Re-targets every namespaced list screen. The caller restarts what is visible.
    pub fn set_namespace(&mut self, namespace: &str) {
        for tab in self.tabs.iter_mut() {
            for frame in tab.stack.iter_mut().chain(tab.forward.iter_mut()) {
                if let Some(list) = frame.screen.as_list_mut()
                    && list.info().namespaced
                {
                    list.set_namespace(namespace);
                }
            }
        }
    }

    pub fn restart_active(&mut self) -> AppCommand {
        if let Some(tab) = self.active_mut() {
            tab.stop_top();
        }
        self.start_active()
    }

    pub fn route(&mut self, action: Action) -> Option<Route> {
        let command = match action {
            Action::Quit => return Some(Route::Quit),
            Action::NewTab => return Some(Route::NewTab),
            Action::CloseTab => self.close_active(),
            Action::NextTab => self.next(),
            Action::PrevTab => self.previous(),
            Action::Back => self.pop(),
            Action::Forward => self.forward(),
            Action::ActivateTab(number) => self.activate(usize::from(number).saturating_sub(1)),
            _ => return None,
        };
        Some(Route::Handled(command))
    }

    fn start_active(&mut self) -> AppCommand {
        self.active_mut()
            .map(Tab::start_top)
            .unwrap_or(AppCommand::None)
    }
}
