use chrono::{DateTime, Local};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::app::AppCommand;
use crate::error::ResourceError;
use crate::model::{KindInfo, RowKey, ResourceRow, namespace_label};
use crate::refresh::{AutoRefresh, Refreshable};

/// Header, breadcrumb, table header, footer and borders.
const LIST_CHROME_ROWS: u16 = 8;

static NEXT_SCREEN: AtomicU64 = AtomicU64::new(1);

/// Identity used to route async results back to the screen that asked for them.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ScreenId(u64);

impl ScreenId {
    pub fn next() -> Self {
        Self(NEXT_SCREEN.fetch_add(1, Ordering::Relaxed))
    }
}

/// Rows of one kind in one namespace, with selection, filter and marks.
#[derive(Debug)]
pub struct ListScreen {
    id: ScreenId,
    info: KindInfo,
    namespace: String,
    rows: Vec<ResourceRow>,
    selected: usize,
    filter: String,
    marks: BTreeSet<RowKey>,
    error: Option<String>,
    loading: bool,
    refreshed_at: Option<DateTime<Local>>,
    page_size: usize,
}

impl ListScreen {
    pub fn new(info: KindInfo, namespace: impl Into<String>) -> Self {
        Self {
            id: ScreenId::next(),
            info,
            namespace: namespace.into(),
            rows: Vec::new(),
            selected: 0,
            filter: String::new(),
            marks: BTreeSet::new(),
            error: None,
            loading: false,
            refreshed_at: None,
            page_size: 10,
        }
    }

    pub fn id(&self) -> ScreenId {
        self.id
    }

    pub fn info(&self) -> &KindInfo {
        &self.info
    }

    pub fn kind(&self) -> &str {
        &self.info.id
    }

    /// Marks belong to the old namespace's rows and are dropped.
    pub fn set_namespace(&mut self, namespace: &str) {
        if self.namespace == namespace {
            return;
        }
        self.namespace = namespace.to_string();
        self.marks.clear();
        self.selected = 0;
    }

    pub fn crumb(&self) -> String {
        if self.info.namespaced {
            format!("{}({})", self.info.title, namespace_label(&self.namespace))
        } else {
            self.info.title.clone()
        }
    }

    pub fn visible_rows(&self) -> Vec<&ResourceRow> {
        self.rows
            .iter()
            .filter(|row| row.matches_filter(&self.filter))
            .collect()
    }

    pub fn total_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn selected_index(&self) -> Option<usize> {
        let visible = self.visible_rows().len();
        (visible > 0).then(|| self.selected.min(visible - 1))
    }

    pub fn selected_row(&self) -> Option<&ResourceRow> {
        let index = self.selected_index()?;
        self.visible_rows().into_iter().nth(index)
    }

    pub fn move_selection(&mut self, delta: isize) {
        let visible = self.visible_rows().len();
        if visible == 0 {
            self.selected = 0;
            return;
        }
        let current = self.selected.min(visible - 1) as isize;
        self.selected = (current + delta).clamp(0, visible as isize - 1) as usize;
    }

    pub fn select_first(&mut self) {
        self.selected = 0;
    }

    pub fn select_last(&mut self) {
        self.selected = self.visible_rows().len().saturating_sub(1);
    }

    pub fn page_step(&self) -> isize {
        self.page_size.max(1) as isize
    }

    pub fn filter(&self) -> &str {
        &self.filter
    }

    pub fn set_filter(&mut self, filter: impl Into<String>) {
        self.filter = filter.into();
        self.selected = 0;
    }

    /// Toggles the mark on the selected row and advances; returns the new state.
    pub fn toggle_mark(&mut self) -> Option<bool> {
        let key = self.selected_row()?.key();
        let marked = if self.marks.remove(&key) {
            false
        } else {
            self.marks.insert(key);
            true
        };
        self.move_selection(1);
        Some(marked)
    }

    pub fn is_marked(&self, row: &ResourceRow) -> bool {
        self.marks.contains(&row.key())
    }

    pub fn mark_count(&self) -> usize {
        self.marks.len()
    }

    pub fn unmark(&mut self, key: &RowKey) {
        self.marks.remove(key);
    }

    /// Marked rows when there are any, otherwise the selected row.
    pub fn targets(&self) -> Vec<RowKey> {
        if !self.marks.is_empty() {
            return self.marks.iter().cloned().collect();
        }
        self.selected_row().map(ResourceRow::key).into_iter().collect()
    }

    /// Replaces the rows, keeping the selection on the same object when it survives.
    pub fn apply_rows(&mut self, rows: Vec<ResourceRow>) {
        let selected_key = self.selected_row().map(ResourceRow::key);
        self.rows = rows;
        let present = self.rows.iter().map(ResourceRow::key).collect::<BTreeSet<_>>();
        self.marks.retain(|key| present.contains(key));

        if let Some(key) = selected_key
            && let Some(index) = self
                .visible_rows()
                .iter()
                .position(|row| row.key() == key)
        {
            self.selected = index;
        } else {
            let visible = self.visible_rows().len();
            self.selected = self.selected.min(visible.saturating_sub(1));
        }

        self.error = None;
        self.loading = false;
        self.refreshed_at = Some(Local::now());
    }

    /// Rows from the last good refresh stay visible under the error.
    pub fn apply_error(&mut self, error: &ResourceError) {
        self.error = Some(error.to_string());
        self.loading = false;
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn last_refresh(&self) -> Option<String> {
        self.refreshed_at
            .map(|stamp| stamp.format("%H:%M:%S").to_string())
    }

    pub fn resize(&mut self, _width: u16, height: u16) {
        self.page_size = height.saturating_sub(LIST_CHROME_ROWS).max(1) as usize;
    }
}

impl Refreshable for ListScreen {
    fn screen_id(&self) -> ScreenId {
        self.id
    }

    fn refresh(&mut self) -> AppCommand {
        self.loading = true;
        AppCommand::FetchRows {
            screen: self.id,
            kind: self.info.id.clone(),
            namespace: self.namespace.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DetailKind {
    Describe,
    Logs,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct DetailTarget {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl DetailTarget {
    pub fn key(&self) -> RowKey {
        RowKey {
            namespace: Some(self.namespace.clone()).filter(|namespace| !namespace.is_empty()),
            name: self.name.clone(),
        }
    }
}

impl std::fmt::Display for DetailTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind, self.key())
    }
}

/// Scrollable text for one object: its YAML description or pod logs.
#[derive(Debug)]
pub struct DetailScreen {
    id: ScreenId,
    mode: DetailKind,
    target: DetailTarget,
    text: String,
    error: Option<String>,
    loading: bool,
    scroll: u16,
    height: u16,
}

impl DetailScreen {
    pub fn new(mode: DetailKind, target: DetailTarget) -> Self {
        Self {
            id: ScreenId::next(),
            mode,
            target,
            text: String::new(),
            error: None,
            loading: false,
            scroll: 0,
            height: 20,
        }
    }

    pub fn id(&self) -> ScreenId {
        self.id
    }

    pub fn mode(&self) -> DetailKind {
        self.mode
    }

    pub fn crumb(&self) -> String {
        match self.mode {
            DetailKind::Describe => format!("describe {}", self.target.name),
            DetailKind::Logs => format!("logs {}", self.target.name),
        }
    }

    pub fn title(&self) -> String {
        match self.mode {
            DetailKind::Describe => format!("{}", self.target),
            DetailKind::Logs => format!("Logs {}", self.target.key()),
        }
    }

    pub fn load(&mut self) -> AppCommand {
        self.loading = true;
        let target = self.target.clone();
        match self.mode {
            DetailKind::Describe => AppCommand::Describe {
                screen: self.id,
                kind: target.kind,
                namespace: target.namespace,
                name: target.name,
            },
            DetailKind::Logs => AppCommand::PodLogs {
                screen: self.id,
                namespace: target.namespace,
                name: target.name,
            },
        }
    }

    pub fn apply(&mut self, result: Result<String, ResourceError>) {
        self.loading = false;
        match result {
            Ok(text) => {
                self.text = text;
                self.error = None;
                if self.mode == DetailKind::Logs {
                    self.scroll = self.max_scroll();
                } else {
                    self.scroll = self.scroll.min(self.max_scroll());
                }
            }
            Err(error) => self.error = Some(error.to_string()),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn scroll(&self) -> u16 {
        self.scroll
    }

    pub fn scroll_by(&mut self, delta: isize) {
        let next = (self.scroll as isize + delta).clamp(0, self.max_scroll() as isize);
        self.scroll = next as u16;
    }

    pub fn scroll_top(&mut self) {
        self.scroll = 0;
    }

    pub fn scroll_bottom(&mut self) {
        self.scroll = self.max_scroll();
    }

    pub fn page_step(&self) -> isize {
        self.height.saturating_sub(2).max(1) as isize
    }

    pub fn resize(&mut self, _width: u16, height: u16) {
        self.height = height.saturating_sub(LIST_CHROME_ROWS).max(1);
        self.scroll = self.scroll.min(self.max_scroll());
    }

    fn max_scroll(&self) -> u16 {
        let lines = self.text.lines().count();
        lines
            .saturating_sub(self.height as usize)
            .min(u16::MAX as usize) as u16
    }
}

/// One entry of a tab's navigation stack.
#[derive(Debug)]
pub enum Screen {
    List(AutoRefresh<ListScreen>),
    Detail(DetailScreen),
}

impl Screen {
    pub fn list(info: KindInfo, namespace: impl Into<String>) -> Self {
        let period = info.refresh;
        Self::List(AutoRefresh::new(ListScreen::new(info, namespace), period))
    }

    pub fn detail(mode: DetailKind, target: DetailTarget) -> Self {
        Self::Detail(DetailScreen::new(mode, target))
    }

    pub fn id(&self) -> ScreenId {
        match self {
            Self::List(list) => list.inner().id(),
            Self::Detail(detail) => detail.id(),
        }
    }

    pub fn crumb(&self) -> String {
        match self {
            Self::List(list) => list.inner().crumb(),
            Self::Detail(detail) => detail.crumb(),
        }
    }

    /// Called whenever the screen becomes the visible top of the active tab.
    pub fn start(&mut self) -> AppCommand {
        match self {
            Self::List(list) => list.start(),
            Self::Detail(detail) => detail.load(),
        }
    }

    pub fn stop(&mut self) {
        if let Self::List(list) = self {
            list.stop();
        }
    }

    pub fn resize(&mut self, width: u16, height: u16) {
        match self {
            Self::List(list) => list.inner_mut().resize(width, height),
            Self::Detail(detail) => detail.resize(width, height),
        }
    }

    pub fn as_list(&self) -> Option<&ListScreen> {
        match self {
            Self::List(list) => Some(list.inner()),
            Self::Detail(_) => None,
        }
    }

    pub fn as_list_mut(&mut self) -> Option<&mut ListScreen> {
        match self {
            Self::List(list) => Some(list.inner_mut()),
            Self::Detail(_) => None,
        }
    }
}
