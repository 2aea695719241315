use std::time::Duration;

use crate::app::AppCommand;
use crate::screens::ScreenId;

/// A screen that knows how to ask for fresh data.
pub trait Refreshable {
    fn screen_id(&self) -> ScreenId;

    /// Marks the screen as loading and returns the fetch to run.
    fn refresh(&mut self) -> AppCommand;
}

/// Periodic refresh around an inner screen.
///
/// Every scheduled tick carries the generation it was issued under. Stopping or
/// restarting bumps the generation, so ticks already in flight are ignored.
#[derive(Debug)]
pub struct AutoRefresh<S> {
    inner: S,
    period: Duration,
    generation: u64,
    running: bool,
}

impl<S: Refreshable> AutoRefresh<S> {
    pub fn new(inner: S, period: Duration) -> Self {
        Self {
            inner,
            period,
            generation: 0,
            running: false,
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Refreshes now and schedules the next tick. A zero period refreshes once.
    pub fn start(&mut self) -> AppCommand {
        self.running = true;
        self.generation += 1;
        let refresh = self.inner.refresh();
        AppCommand::batch(vec![refresh, self.schedule()])
    }

    pub fn on_tick(&mut self, generation: u64) -> AppCommand {
        if !self.running || generation != self.generation {
            return AppCommand::None;
        }
        let refresh = self.inner.refresh();
        AppCommand::batch(vec![refresh, self.schedule()])
    }

    /// Manual refresh; the timer keeps its own cadence.
    pub fn refresh_now(&mut self) -> AppCommand {
        self.inner.refresh()
    }

    pub fn stop(&mut self) {
        self.running = false;
        self.generation += 1;
    }

    fn schedule(&self) -> AppCommand {
        if self.period.is_zero() {
            return AppCommand::None;
        }
        AppCommand::ScheduleTick {
            screen: self.inner.screen_id(),
            generation: self.generation,
            after: self.period,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AutoRefresh, Refreshable};
    use crate::app::AppCommand;
    use crate::screens::ScreenId;
    use std::time::Duration;

    struct Counter {
        id: ScreenId,
        refreshes: usize,
    }

    impl Refreshable for Counter {
        fn screen_id(&self) -> ScreenId {
            self.id
        }

        fn refresh(&mut self) -> AppCommand {
            self.refreshes += 1;
            AppCommand::FetchRows {
                screen: self.id,
                kind: "Pod".to_string(),
                namespace: "default".to_string(),
            }
        }
    }

    fn counter() -> Counter {
        Counter {
            id: ScreenId::next(),
            refreshes: 0,
        }
    }

    fn scheduled_generation(command: &AppCommand) -> Option<u64> {
        match command {
            AppCommand::ScheduleTick { generation, .. } => Some(*generation),
            AppCommand::Batch(commands) => commands.iter().find_map(scheduled_generation),
            _ => None,
        }
    }

    #[test]
    fn stale_ticks_are_ignored_after_stop() {
        let mut refresh = AutoRefresh::new(counter(), Duration::from_millis(50));
        let mut command = refresh.start();

        for _ in 0..5 {
            let generation = scheduled_generation(&command).expect("next tick scheduled");
            command = refresh.on_tick(generation);
        }
        assert_eq!(refresh.inner().refreshes, 6);

        let pending = scheduled_generation(&command).expect("tick in flight");
        refresh.stop();

        assert_eq!(refresh.on_tick(pending), AppCommand::None);
        assert_eq!(refresh.inner().refreshes, 6);
        assert!(!refresh.is_running());
    }

    #[test]
    fn restart_invalidates_ticks_from_the_previous_run() {
        let mut refresh = AutoRefresh::new(counter(), Duration::from_secs(5));
        let first = scheduled_generation(&refresh.start()).expect("tick");
        refresh.stop();
        let second = scheduled_generation(&refresh.start()).expect("tick");

        assert_ne!(first, second);
        assert_eq!(refresh.on_tick(first), AppCommand::None);
        assert_ne!(refresh.on_tick(second), AppCommand::None);
    }

    #[test]
    fn zero_period_refreshes_once_without_scheduling() {
        let mut refresh = AutoRefresh::new(counter(), Duration::ZERO);
        let command = refresh.start();

        assert!(matches!(command, AppCommand::FetchRows { .. }));
        assert_eq!(scheduled_generation(&command), None);
        assert_eq!(refresh.inner().refreshes, 1);

        assert!(matches!(refresh.refresh_now(), AppCommand::FetchRows { .. }));
        assert_eq!(refresh.inner().refreshes, 2);
    }
}
