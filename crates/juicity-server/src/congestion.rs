//! Congestion controller selection

use std::fmt;
use std::sync::Arc;

use quinn::congestion::{BbrConfig, CubicConfig, NewRenoConfig};
use quinn::TransportConfig;
use tracing::warn;

/// Congestion controller named by the `congestion_control` option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CongestionControl {
    /// Leave quinn's default controller in place.
    #[default]
    Default,
    Cubic,
    NewReno,
    Bbr,
}

impl CongestionControl {
    /// Parse a configured name. Matching is case-insensitive; an empty name
    /// selects the default and an unknown one falls back to it with a warning.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "default" => CongestionControl::Default,
            "cubic" => CongestionControl::Cubic,
            "new_reno" | "newreno" | "reno" => CongestionControl::NewReno,
            "bbr" => CongestionControl::Bbr,
            other => {
                warn!(name = other, "unknown congestion control, using default");
                CongestionControl::Default
            }
        }
    }

    /// Install the controller on `transport`, starting from `initial_window`
    /// bytes.
    pub fn apply(self, transport: &mut TransportConfig, initial_window: u64) {
        match self {
            CongestionControl::Default => {}
            CongestionControl::Cubic => {
                let mut cfg = CubicConfig::default();
                cfg.initial_window(initial_window);
                transport.congestion_controller_factory(Arc::new(cfg));
            }
            CongestionControl::NewReno => {
                let mut cfg = NewRenoConfig::default();
                cfg.initial_window(initial_window);
                transport.congestion_controller_factory(Arc::new(cfg));
            }
            CongestionControl::Bbr => {
                let mut cfg = BbrConfig::default();
                cfg.initial_window(initial_window);
                transport.congestion_controller_factory(Arc::new(cfg));
            }
        }
    }
}

impl fmt::Display for CongestionControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CongestionControl::Default => "default",
            CongestionControl::Cubic => "cubic",
            CongestionControl::NewReno => "new_reno",
            CongestionControl::Bbr => "bbr",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing::{Event, Level, Subscriber};
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    struct CountWarnings(Arc<AtomicUsize>);

    impl<S: Subscriber> Layer<S> for CountWarnings {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            if *event.metadata().level() == Level::WARN {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    #[test]
    fn test_unknown_name_warns() {
        let warnings = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(CountWarnings(warnings.clone()));
        tracing::subscriber::with_default(subscriber, || {
            CongestionControl::parse("bbr");
            assert_eq!(warnings.load(Ordering::Relaxed), 0);
            CongestionControl::parse("vegas");
        });
        assert_eq!(warnings.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_parse_names() {
        assert_eq!(CongestionControl::parse(""), CongestionControl::Default);
        assert_eq!(CongestionControl::parse("BBR"), CongestionControl::Bbr);
        assert_eq!(CongestionControl::parse("cubic"), CongestionControl::Cubic);
        assert_eq!(CongestionControl::parse("new_reno"), CongestionControl::NewReno);
        assert_eq!(CongestionControl::parse("reno"), CongestionControl::NewReno);
        assert_eq!(CongestionControl::parse("vegas"), CongestionControl::Default);
    }

    #[test]
    fn test_display_parses_back() {
        for cc in [
            CongestionControl::Default,
            CongestionControl::Cubic,
            CongestionControl::NewReno,
            CongestionControl::Bbr,
        ] {
            assert_eq!(CongestionControl::parse(&cc.to_string()), cc);
        }
    }
}
