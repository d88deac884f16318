use super::{LifecycleSnapshot, LoadPhase, Scope, Subscriptions};
use crate::config::SdkConfig;
use crate::error::{Result, SdkError};
use crate::sdk::{ChatbotSdk, SdkHolder};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use tokio::sync::watch;
use tracing::{debug, warn};

#[derive(Default, Clone)]
pub struct ProviderCallbacks {
    pub on_error: Option<Rc<dyn Fn(&SdkError)>>,
    pub on_initialized: Option<Rc<dyn Fn(&Rc<ChatbotSdk>)>>,
}

/// Initializes the SDK once for a subtree and shares its lifecycle with descendants.
///
/// Moves `Idle → Loading → Ready | Error`. `Error` is terminal; mount a new provider to
/// retry.
pub struct ChatbotProvider {
    holder: SdkHolder,
    config: RefCell<SdkConfig>,
    callbacks: ProviderCallbacks,
    snapshot: watch::Sender<LifecycleSnapshot>,
    started: Cell<bool>,
    mounted: Cell<bool>,
    subscription: Subscriptions,
}

impl ChatbotProvider {
    pub fn mount(
        scope: &Scope,
        holder: SdkHolder,
        config: SdkConfig,
        callbacks: ProviderCallbacks,
    ) -> Rc<Self> {
        let (snapshot, _) = watch::channel(LifecycleSnapshot::default());
        let provider = Rc::new(Self {
            holder,
            config: RefCell::new(config),
            callbacks,
            snapshot,
            started: Cell::new(false),
            mounted: Cell::new(true),
            subscription: Subscriptions::default(),
        });
        scope.provide(provider.clone());
        let weak = Rc::downgrade(&provider);
        scope.on_unmount(move || {
            if let Some(provider) = weak.upgrade() {
                provider.unmount();
            }
        });
        provider
    }

    /// Runs initialization. Only the first call on a provider does anything.
    pub async fn start(self: &Rc<Self>) {
        if self.started.replace(true) {
            debug!("provider already started");
            return;
        }
        self.snapshot.send_modify(|snap| {
            snap.phase = LoadPhase::Loading;
            snap.loading = true;
            snap.error = None;
        });

        let config = self.config.borrow().clone();
        match self.holder.init(config).await {
            Ok(sdk) => {
                if !self.mounted.get() {
                    debug!("provider unmounted during init; not subscribing");
                    self.snapshot.send_modify(|snap| {
                        snap.loading = false;
                        snap.phase = LoadPhase::Idle;
                    });
                    return;
                }
                self.subscribe(&sdk);
                let state = sdk.state();
                self.snapshot.send_modify(|snap| {
                    snap.sdk = Some(sdk.clone());
                    snap.initialized = true;
                    snap.loading = false;
                    snap.state = state;
                    snap.phase = LoadPhase::Ready;
                });
                if let Some(on_initialized) = &self.callbacks.on_initialized {
                    on_initialized(&sdk);
                }
            }
            Err(err) => {
                warn!(%err, "chatbot provider failed to initialize");
                self.snapshot.send_modify(|snap| {
                    snap.error = Some(err.clone());
                    snap.loading = false;
                    snap.phase = LoadPhase::Error;
                });
                if let Some(on_error) = &self.callbacks.on_error {
                    on_error(&err);
                }
            }
        }
    }

    fn subscribe(self: &Rc<Self>, sdk: &Rc<ChatbotSdk>) {
        let weak: Weak<Self> = Rc::downgrade(self);
        let unsubscribe = sdk.on_state_change(move |state| {
            if let Some(provider) = weak.upgrade() {
                provider
                    .snapshot
                    .send_modify(|snap| snap.state = state.clone());
            }
        });
        // The handle is owned by `subscription`; release goes through it.
        let _ = self.subscription.track(unsubscribe);
    }

    /// A config change releases the state subscription. The SDK keeps its first
    /// configuration, so the provider re-subscribes to the same instance instead of
    /// initializing again.
    pub fn set_config(self: &Rc<Self>, config: SdkConfig) {
        if *self.config.borrow() == config {
            return;
        }
        *self.config.borrow_mut() = config;
        self.subscription.release_all();
        let sdk = self.snapshot.borrow().sdk.clone();
        if let Some(sdk) = sdk {
            if self.mounted.get() {
                self.subscribe(&sdk);
                let state = sdk.state();
                self.snapshot.send_modify(|snap| snap.state = state);
            }
        }
    }

    fn unmount(&self) {
        self.mounted.set(false);
        self.subscription.release_all();
    }

    pub fn snapshot(&self) -> LifecycleSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe_snapshot(&self) -> watch::Receiver<LifecycleSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn sdk(&self) -> Option<Rc<ChatbotSdk>> {
        self.snapshot.borrow().sdk.clone()
    }

    #[cfg(test)]
    pub(crate) fn live_subscriptions(&self) -> usize {
        self.subscription.live()
    }
}

/// The nearest provider above `scope`.
pub fn use_chatbot_context(scope: &Scope) -> Result<Rc<ChatbotProvider>> {
    scope
        .context::<ChatbotProvider>()
        .ok_or(SdkError::ContextMisuse("use_chatbot_context"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::RecordingBridge;
    use crate::env::{Environment, Page, ScriptedFetcher};
    use crate::error::ErrorCode;
    use std::time::Duration;

    const WIDGET_ID: &str = "0b6f5c3e-2d4a-4e8f-9c1b-7a6d5e4f3c2b";

    fn holder() -> SdkHolder {
        let fetcher = ScriptedFetcher::new();
        fetcher.attach_on_script_load(RecordingBridge::new());
        SdkHolder::new(Environment::browser(Page::blank(fetcher)))
    }

    #[tokio::test]
    async fn provider_reaches_ready_and_mirrors_state() {
        let root = Scope::root();
        let initialized = Rc::new(Cell::new(false));
        let flag = initialized.clone();
        let provider = ChatbotProvider::mount(
            &root,
            holder(),
            SdkConfig::new(WIDGET_ID),
            ProviderCallbacks {
                on_initialized: Some(Rc::new(move |_: &Rc<ChatbotSdk>| flag.set(true))),
                ..Default::default()
            },
        );
        assert_eq!(provider.snapshot().phase, LoadPhase::Idle);
        let mut rx = provider.subscribe_snapshot();

        provider.start().await;
        let snap = provider.snapshot();
        assert_eq!(snap.phase, LoadPhase::Ready);
        assert!(snap.initialized && !snap.loading && snap.state.is_loaded);
        assert!(initialized.get());
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        provider.sdk().unwrap().open();
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().state.is_open);

        let child = root.child();
        let found = use_chatbot_context(&child).unwrap();
        assert!(Rc::ptr_eq(&found, &provider));
    }

    #[tokio::test]
    async fn start_runs_once() {
        let root = Scope::root();
        let holder = holder();
        let provider =
            ChatbotProvider::mount(&root, holder.clone(), SdkConfig::new(WIDGET_ID), Default::default());
        provider.start().await;
        provider.start().await;
        assert_eq!(provider.live_subscriptions(), 1);
        assert_eq!(holder.get_instance().state_listener_count(), 1);
    }

    #[tokio::test]
    async fn error_is_stored_not_thrown() {
        let root = Scope::root();
        let seen = Rc::new(RefCell::new(None));
        let sink = seen.clone();
        let provider = ChatbotProvider::mount(
            &root,
            holder(),
            SdkConfig::new("bogus"),
            ProviderCallbacks {
                on_error: Some(Rc::new(move |err: &SdkError| *sink.borrow_mut() = Some(err.code()))),
                ..Default::default()
            },
        );
        provider.start().await;
        let snap = provider.snapshot();
        assert_eq!(snap.phase, LoadPhase::Error);
        assert_eq!(snap.error.unwrap().code(), ErrorCode::InvalidIdentifierFormat);
        assert!(!snap.initialized && snap.sdk.is_none());
        assert_eq!(*seen.borrow(), Some(ErrorCode::InvalidIdentifierFormat));

        provider.start().await;
        assert_eq!(provider.snapshot().phase, LoadPhase::Error);
    }

    #[tokio::test]
    async fn unmount_releases_subscription_exactly_once() {
        let root = Scope::root();
        let holder = holder();
        let provider =
            ChatbotProvider::mount(&root, holder.clone(), SdkConfig::new(WIDGET_ID), Default::default());
        provider.start().await;
        let sdk = holder.get_instance();
        let _other = sdk.on_state_change(|_| {});
        assert_eq!(sdk.state_listener_count(), 2);

        root.unmount();
        assert_eq!(sdk.state_listener_count(), 1);
        root.unmount();
        assert_eq!(sdk.state_listener_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unmount_during_init_settles_to_idle() {
        let fetcher = ScriptedFetcher::with_latency(Duration::from_millis(200));
        fetcher.attach_on_script_load(RecordingBridge::new());
        let holder = SdkHolder::new(Environment::browser(Page::blank(fetcher)));
        let root = Scope::root();
        let provider =
            ChatbotProvider::mount(&root, holder.clone(), SdkConfig::new(WIDGET_ID), Default::default());

        tokio::join!(provider.start(), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            assert_eq!(provider.snapshot().phase, LoadPhase::Loading);
            root.unmount();
        });

        let snap = provider.snapshot();
        assert_eq!(snap.phase, LoadPhase::Idle);
        assert!(!snap.loading && snap.sdk.is_none());
        assert_eq!(holder.get_instance().state_listener_count(), 0);
    }

    #[test]
    fn unmount_without_subscription_is_harmless() {
        let root = Scope::root();
        let _provider =
            ChatbotProvider::mount(&root, holder(), SdkConfig::new(WIDGET_ID), Default::default());
        root.unmount();
    }

    #[tokio::test]
    async fn config_change_swaps_subscription() {
        let root = Scope::root();
        let holder = holder();
        let provider =
            ChatbotProvider::mount(&root, holder.clone(), SdkConfig::new(WIDGET_ID), Default::default());
        provider.start().await;
        provider.set_config(SdkConfig::new(WIDGET_ID).with_debug(true));
        assert_eq!(holder.get_instance().state_listener_count(), 1);
        assert_eq!(provider.live_subscriptions(), 1);
    }

    #[test]
    fn context_outside_provider_is_misuse() {
        let err = use_chatbot_context(&Scope::root()).err().unwrap();
        assert_eq!(err.code(), ErrorCode::ContextMisuse);
    }
}
