use std::future::Future;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::{
    ApplicationServerKey, Permission, PushConfig, PushError, PushPlatform, PushResult,
    PushSubscriptionRecord, SubscriptionBackend,
};

/// Progress of one session's registration. Moves forward only; `PermissionDenied` and
/// `RegisteredWithBackend` are terminal, and a failed step leaves the last reached state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Idle,
    PermissionRequested,
    PermissionGranted,
    PermissionDenied,
    WorkerRegistered,
    PushSubscribed,
    RegisteredWithBackend,
}

impl RegistrationState {
    fn rank(self) -> u8 {
        match self {
            RegistrationState::Idle => 0,
            RegistrationState::PermissionRequested => 1,
            RegistrationState::PermissionGranted | RegistrationState::PermissionDenied => 2,
            RegistrationState::WorkerRegistered => 3,
            RegistrationState::PushSubscribed => 4,
            RegistrationState::RegisteredWithBackend => 5,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RegistrationState::PermissionDenied | RegistrationState::RegisteredWithBackend
        )
    }
}

/// How often the worker, subscription and backend steps are attempted. The permission prompt
/// is never repeated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Single attempt per step.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    pub fn bounded(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// Drives the registration state machine for one session. Build a new client per login.
pub struct PushRegistrationClient<P, B> {
    platform: P,
    backend: B,
    key: ApplicationServerKey,
    worker_script: String,
    retry: RetryPolicy,
    state: RegistrationState,
    last_error: Option<PushError>,
}

impl<P: PushPlatform, B: SubscriptionBackend> PushRegistrationClient<P, B> {
    pub fn new(platform: P, backend: B, key: ApplicationServerKey) -> Self {
        Self {
            platform,
            backend,
            key,
            worker_script: "/sw.js".to_string(),
            retry: RetryPolicy::none(),
            state: RegistrationState::Idle,
            last_error: None,
        }
    }

    pub fn from_config(platform: P, backend: B, config: &PushConfig) -> PushResult<Self> {
        let raw = config.application_server_key.as_deref().ok_or_else(|| {
            PushError::InvalidKey("PUSH_APPLICATION_SERVER_KEY is not set".to_string())
        })?;
        let key = ApplicationServerKey::from_base64url(raw)?;
        Ok(Self::new(platform, backend, key)
            .with_worker_script(config.worker_script.clone())
            .with_retry(config.retry))
    }

    pub fn with_worker_script(mut self, script: impl Into<String>) -> Self {
        self.worker_script = script.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn state(&self) -> RegistrationState {
        self.state
    }

    /// The error that stopped the last run, if any.
    pub fn last_error(&self) -> Option<&PushError> {
        self.last_error.as_ref()
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Run the registration for `user_id`. Without a user or platform support this is a
    /// no-op. Once the machine has left `Idle`, later calls return the current state without
    /// side effects.
    pub async fn run(&mut self, user_id: Option<&str>) -> RegistrationState {
        if self.state != RegistrationState::Idle {
            debug!(
                target = "push.registration",
                state = ?self.state,
                "registration already ran this session"
            );
            return self.state;
        }
        let Some(user_id) = user_id.map(str::trim).filter(|id| !id.is_empty()) else {
            debug!(target = "push.registration", "no user identity; skipping push registration");
            return self.state;
        };
        if !self.platform.supports_workers() || !self.platform.supports_push() {
            info!(
                target = "push.registration",
                "platform lacks background worker or push support; notifications disabled"
            );
            return self.state;
        }

        self.advance(RegistrationState::PermissionRequested);
        let permission = self.platform.request_permission().await;
        match permission {
            Ok(Permission::Granted) => self.advance(RegistrationState::PermissionGranted),
            Ok(permission) => {
                info!(
                    target = "push.registration",
                    ?permission,
                    "notification permission not granted"
                );
                self.advance(RegistrationState::PermissionDenied);
                return self.state;
            }
            Err(err) => return self.abort("request_permission", err),
        }

        let registration = {
            let platform = &self.platform;
            let script = self.worker_script.as_str();
            with_retry(&self.retry, "register_worker", move || {
                platform.register_worker(script)
            })
            .await
        };
        let registration = match registration {
            Ok(registration) => registration,
            Err(err) => return self.abort("register_worker", err),
        };
        self.advance(RegistrationState::WorkerRegistered);

        let subscription = {
            let platform = &self.platform;
            let key = &self.key;
            let registration = &registration;
            with_retry(&self.retry, "subscribe", move || {
                platform.subscribe(registration, key)
            })
            .await
        };
        let subscription = match subscription {
            Ok(subscription) => subscription,
            Err(err) => return self.abort("subscribe", err),
        };
        self.advance(RegistrationState::PushSubscribed);

        let record = PushSubscriptionRecord {
            user_id: user_id.to_string(),
            subscription,
        };
        let registered = {
            let backend = &self.backend;
            let record = &record;
            with_retry(&self.retry, "register_backend", move || backend.register(record)).await
        };
        if let Err(err) = registered {
            return self.abort("register_backend", err);
        }
        self.advance(RegistrationState::RegisteredWithBackend);
        info!(
            target = "push.registration",
            user_id = %record.user_id,
            endpoint = %record.subscription.endpoint,
            "push subscription registered"
        );
        self.state
    }

    fn advance(&mut self, next: RegistrationState) {
        debug_assert!(
            next.rank() > self.state.rank(),
            "registration cannot move from {:?} to {:?}",
            self.state,
            next
        );
        debug!(target = "push.registration", from = ?self.state, to = ?next, "registration state");
        self.state = next;
    }

    fn abort(&mut self, step: &'static str, err: PushError) -> RegistrationState {
        warn!(
            target = "push.registration",
            step,
            state = ?self.state,
            error = %err,
            "push registration aborted"
        );
        self.last_error = Some(err);
        self.state
    }
}

async fn with_retry<T, F, Fut>(policy: &RetryPolicy, step: &'static str, mut op: F) -> PushResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = PushResult<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < attempts => {
                warn!(
                    target = "push.registration",
                    step,
                    attempt,
                    error = %err,
                    "registration step failed; retrying"
                );
                tokio::time::sleep(policy.backoff).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PushSubscription, SubscriptionKeys, WorkerRegistration};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FakePlatform {
        workers: bool,
        push: bool,
        permission: Permission,
        fail_worker: bool,
        permission_prompts: AtomicUsize,
        worker_attempts: AtomicUsize,
    }

    impl FakePlatform {
        fn granting() -> Self {
            Self {
                workers: true,
                push: true,
                permission: Permission::Granted,
                fail_worker: false,
                permission_prompts: AtomicUsize::new(0),
                worker_attempts: AtomicUsize::new(0),
            }
        }
    }

    fn subscription() -> PushSubscription {
        PushSubscription {
            endpoint: "https://push.example.com/send/abc".into(),
            expiration_time: None,
            keys: SubscriptionKeys {
                p256dh: "BPk".into(),
                auth: "auth-secret".into(),
            },
        }
    }

    #[async_trait]
    impl PushPlatform for FakePlatform {
        fn supports_workers(&self) -> bool {
            self.workers
        }

        fn supports_push(&self) -> bool {
            self.push
        }

        async fn request_permission(&self) -> PushResult<Permission> {
            self.permission_prompts.fetch_add(1, Ordering::SeqCst);
            Ok(self.permission)
        }

        async fn register_worker(&self, script_url: &str) -> PushResult<WorkerRegistration> {
            self.worker_attempts.fetch_add(1, Ordering::SeqCst);
            if self.fail_worker {
                return Err(PushError::Platform("worker script failed to load".into()));
            }
            Ok(WorkerRegistration {
                script_url: script_url.to_string(),
                scope: "/".into(),
            })
        }

        async fn subscribe(
            &self,
            _registration: &WorkerRegistration,
            _key: &ApplicationServerKey,
        ) -> PushResult<PushSubscription> {
            Ok(subscription())
        }
    }

    #[derive(Default)]
    struct RecordingBackend {
        calls: Mutex<Vec<PushSubscriptionRecord>>,
        failures: AtomicUsize,
    }

    #[async_trait]
    impl SubscriptionBackend for RecordingBackend {
        async fn register(&self, record: &PushSubscriptionRecord) -> PushResult<()> {
            self.calls.lock().unwrap().push(record.clone());
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(PushError::Platform("backend unavailable".into()));
            }
            Ok(())
        }
    }

    fn key() -> ApplicationServerKey {
        let mut bytes = vec![0x04];
        bytes.extend(std::iter::repeat(7u8).take(64));
        ApplicationServerKey::from_bytes(bytes).unwrap()
    }

    #[tokio::test]
    async fn granted_permission_registers_exactly_once() {
        let mut client = PushRegistrationClient::new(
            FakePlatform::granting(),
            RecordingBackend::default(),
            key(),
        );
        let state = client.run(Some("user-1")).await;
        assert_eq!(state, RegistrationState::RegisteredWithBackend);

        let calls = client.backend().calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![PushSubscriptionRecord {
                user_id: "user-1".into(),
                subscription: subscription(),
            }]
        );

        assert_eq!(client.run(Some("user-1")).await, RegistrationState::RegisteredWithBackend);
        assert_eq!(client.backend().calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn denied_permission_is_terminal_and_never_reprompts() {
        let platform = FakePlatform {
            permission: Permission::Denied,
            ..FakePlatform::granting()
        };
        let mut client = PushRegistrationClient::new(platform, RecordingBackend::default(), key());
        assert_eq!(client.run(Some("user-1")).await, RegistrationState::PermissionDenied);
        assert_eq!(client.run(Some("user-1")).await, RegistrationState::PermissionDenied);
        assert!(client.state().is_terminal());
        assert_eq!(client.platform().permission_prompts.load(Ordering::SeqCst), 1);
        assert!(client.backend().calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_identity_or_support_never_starts() {
        let mut client = PushRegistrationClient::new(
            FakePlatform::granting(),
            RecordingBackend::default(),
            key(),
        );
        assert_eq!(client.run(None).await, RegistrationState::Idle);
        assert_eq!(client.run(Some("  ")).await, RegistrationState::Idle);

        let platform = FakePlatform {
            push: false,
            ..FakePlatform::granting()
        };
        let mut unsupported =
            PushRegistrationClient::new(platform, RecordingBackend::default(), key());
        assert_eq!(unsupported.run(Some("user-1")).await, RegistrationState::Idle);
        assert_eq!(unsupported.platform().permission_prompts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_step_stops_in_last_good_state() {
        let platform = FakePlatform {
            fail_worker: true,
            ..FakePlatform::granting()
        };
        let mut client = PushRegistrationClient::new(platform, RecordingBackend::default(), key());
        assert_eq!(client.run(Some("user-1")).await, RegistrationState::PermissionGranted);
        assert!(matches!(client.last_error(), Some(PushError::Platform(_))));
        assert_eq!(client.platform().worker_attempts.load(Ordering::SeqCst), 1);
        assert!(client.backend().calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn backend_failure_without_retry_is_not_retried() {
        let backend = RecordingBackend {
            failures: AtomicUsize::new(1),
            ..RecordingBackend::default()
        };
        let mut client = PushRegistrationClient::new(FakePlatform::granting(), backend, key());
        assert_eq!(client.run(Some("user-1")).await, RegistrationState::PushSubscribed);
        assert_eq!(client.backend().calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn bounded_retry_recovers_transient_backend_failure() {
        let backend = RecordingBackend {
            failures: AtomicUsize::new(1),
            ..RecordingBackend::default()
        };
        let mut client = PushRegistrationClient::new(FakePlatform::granting(), backend, key())
            .with_retry(RetryPolicy::bounded(2, Duration::ZERO));
        assert_eq!(
            client.run(Some("user-1")).await,
            RegistrationState::RegisteredWithBackend
        );
        assert_eq!(client.backend().calls.lock().unwrap().len(), 2);
    }

    #[test]
    fn from_config_requires_a_key() {
        let config = PushConfig::default();
        let result = PushRegistrationClient::from_config(
            FakePlatform::granting(),
            RecordingBackend::default(),
            &config,
        );
        assert!(matches!(result, Err(PushError::InvalidKey(_))));
    }
}
