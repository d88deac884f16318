use super::{LifecycleSnapshot, LoadPhase, Scope, Subscriptions};
use crate::config::SdkConfig;
use crate::error::Result;
use crate::sdk::{ChatbotSdk, SdkHolder};
use std::rc::{Rc, Weak};
use tokio::sync::watch;
use tracing::warn;

/// Standalone lifecycle binding for components that manage the SDK without a provider.
pub struct ChatbotHook {
    holder: SdkHolder,
    snapshot: watch::Sender<LifecycleSnapshot>,
    subscription: Subscriptions,
}

impl ChatbotHook {
    pub fn mount(scope: &Scope, holder: SdkHolder) -> Rc<Self> {
        let (snapshot, _) = watch::channel(LifecycleSnapshot::default());
        let hook = Rc::new(Self {
            holder,
            snapshot,
            subscription: Subscriptions::default(),
        });
        let weak = Rc::downgrade(&hook);
        scope.on_unmount(move || {
            if let Some(hook) = weak.upgrade() {
                hook.subscription.release_all();
            }
        });
        hook
    }

    /// Initializes the SDK and starts mirroring its state. A no-op once initialized.
    /// Failures are recorded in the snapshot as well as returned.
    pub async fn init(self: &Rc<Self>, config: SdkConfig) -> Result<()> {
        if self.snapshot.borrow().initialized {
            return Ok(());
        }
        self.snapshot.send_modify(|snap| {
            snap.loading = true;
            snap.error = None;
            snap.phase = LoadPhase::Loading;
        });
        match self.holder.init(config).await {
            Ok(sdk) => {
                let weak: Weak<Self> = Rc::downgrade(self);
                let unsubscribe = sdk.on_state_change(move |state| {
                    if let Some(hook) = weak.upgrade() {
                        hook.snapshot.send_modify(|snap| snap.state = state.clone());
                    }
                });
                let _ = self.subscription.track(unsubscribe);
                let state = sdk.state();
                self.snapshot.send_modify(|snap| {
                    snap.sdk = Some(sdk);
                    snap.initialized = true;
                    snap.loading = false;
                    snap.state = state;
                    snap.phase = LoadPhase::Ready;
                });
                Ok(())
            }
            Err(err) => {
                warn!(%err, "chatbot hook failed to initialize");
                self.snapshot.send_modify(|snap| {
                    snap.error = Some(err.clone());
                    snap.loading = false;
                    snap.phase = LoadPhase::Error;
                });
                Err(err)
            }
        }
    }

    /// Destroys the SDK instance and resets the hook to its unmounted defaults.
    pub fn destroy(&self) {
        let sdk = self.snapshot.borrow().sdk.clone();
        let Some(sdk) = sdk else {
            return;
        };
        self.subscription.release_all();
        sdk.destroy();
        self.snapshot.send_replace(LifecycleSnapshot::default());
    }

    pub fn sdk(&self) -> Option<Rc<ChatbotSdk>> {
        self.snapshot.borrow().sdk.clone()
    }

    pub fn snapshot(&self) -> LifecycleSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe_snapshot(&self) -> watch::Receiver<LifecycleSnapshot> {
        self.snapshot.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::RecordingBridge;
    use crate::env::{Environment, Page, ScriptedFetcher};
    use crate::error::ErrorCode;

    const WIDGET_ID: &str = "0b6f5c3e-2d4a-4e8f-9c1b-7a6d5e4f3c2b";

    fn holder() -> SdkHolder {
        let fetcher = ScriptedFetcher::new();
        fetcher.attach_on_script_load(RecordingBridge::new());
        SdkHolder::new(Environment::browser(Page::blank(fetcher)))
    }

    #[tokio::test]
    async fn init_then_destroy_round_trip() {
        let scope = Scope::root();
        let holder = holder();
        let hook = ChatbotHook::mount(&scope, holder.clone());
        hook.init(SdkConfig::new(WIDGET_ID)).await.unwrap();
        hook.init(SdkConfig::new(WIDGET_ID)).await.unwrap();

        let sdk = hook.sdk().unwrap();
        assert_eq!(sdk.state_listener_count(), 1);
        sdk.hide();
        assert!(!hook.snapshot().state.is_visible);

        hook.destroy();
        let snap = hook.snapshot();
        assert!(!snap.initialized && snap.sdk.is_none());
        assert_eq!(snap.phase, LoadPhase::Idle);
        assert!(!holder.has_instance());
    }

    #[tokio::test]
    async fn failure_is_returned_and_recorded() {
        let hook = ChatbotHook::mount(&Scope::root(), holder());
        let err = hook.init(SdkConfig::new("")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::MissingIdentifier);
        let snap = hook.snapshot();
        assert_eq!(snap.phase, LoadPhase::Error);
        assert_eq!(snap.error, Some(err));
    }

    #[tokio::test]
    async fn unmount_drops_state_listener() {
        let scope = Scope::root();
        let hook = ChatbotHook::mount(&scope, holder());
        hook.init(SdkConfig::new(WIDGET_ID).with_auto_load(false))
            .await
            .unwrap();
        let sdk = hook.sdk().unwrap();
        scope.unmount();
        assert_eq!(sdk.state_listener_count(), 0);
        hook.destroy();
        assert!(!sdk.is_ready());
    }
}
