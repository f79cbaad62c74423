//! Bucket definitions: the per-namespace policy the dispatcher enforces.

use crate::models::upload::UploadMetadata;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// What a bucket accepts.
///
/// Image buckets constrain content types to `image/*` and may ask the
/// store for server-side thumbnail generation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BucketKind {
    /// Any content type.
    File,
    /// `image/*` content types only.
    Image {
        /// Hint forwarded to the object store on each upload grant.
        thumbnails: bool,
    },
}

impl BucketKind {
    /// Whether `content_type` is acceptable for this kind.
    pub fn accepts(&self, content_type: &str) -> bool {
        match self {
            BucketKind::File => true,
            BucketKind::Image { .. } => content_type.starts_with("image/"),
        }
    }

    pub fn wants_thumbnails(&self) -> bool {
        matches!(self, BucketKind::Image { thumbnails: true })
    }
}

/// Outcome of an authorization hook. Denial is terminal for the request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(String),
}

/// What a hook is being asked about.
#[derive(Clone, Copy, Debug)]
pub enum HookTarget<'a> {
    /// An upload about to be granted.
    Upload(&'a UploadMetadata),
    /// An existing object, by key.
    Object(&'a str),
}

/// A capability check attached to a bucket operation.
///
/// Hooks receive the opaque caller context and the target of the
/// operation. They may suspend (e.g. to consult a remote permission
/// service); the dispatcher awaits them without blocking other
/// requests. Plain functions work too via the blanket impl below.
#[async_trait]
pub trait AuthorizationHook<C>: Send + Sync {
    async fn authorize(&self, ctx: &C, target: HookTarget<'_>) -> Decision;
}

#[async_trait]
impl<C, F> AuthorizationHook<C> for F
where
    C: Send + Sync,
    F: for<'a> Fn(&C, HookTarget<'a>) -> Decision + Send + Sync,
{
    async fn authorize(&self, ctx: &C, target: HookTarget<'_>) -> Decision {
        (self)(ctx, target)
    }
}

/// Deterministic mapping from (caller context, metadata) to a key
/// relative to the bucket.
pub type PathFn<C> = Arc<dyn Fn(&C, &UploadMetadata) -> String + Send + Sync>;

/// Default path strategy: the bare file name.
fn file_name_path<C>(_: &C, meta: &UploadMetadata) -> String {
    meta.file_name.clone()
}

/// A named storage namespace and its policy.
///
/// Definitions are assembled builder-style at startup and registered
/// with a [`crate::router::RouterBuilder`]; they are immutable after
/// that.
pub struct BucketDefinition<C> {
    name: String,
    kind: BucketKind,
    max_size_bytes: Option<u64>,
    public: bool,
    path_fn: PathFn<C>,
    before_upload: Vec<Arc<dyn AuthorizationHook<C>>>,
    before_delete: Vec<Arc<dyn AuthorizationHook<C>>>,
    before_request_access: Vec<Arc<dyn AuthorizationHook<C>>>,
}

impl<C: 'static> BucketDefinition<C> {
    /// New definition with the default path function (the bare file
    /// name) and no hooks or size bound.
    pub fn new(name: impl Into<String>, kind: BucketKind) -> Self {
        Self {
            name: name.into(),
            kind,
            max_size_bytes: None,
            public: false,
            path_fn: Arc::new(file_name_path::<C>),
            before_upload: Vec::new(),
            before_delete: Vec::new(),
            before_request_access: Vec::new(),
        }
    }

    /// Cap accepted upload sizes. Absent means unbounded.
    pub fn max_size_bytes(mut self, limit: u64) -> Self {
        self.max_size_bytes = Some(limit);
        self
    }

    /// Serve reads through stable unsigned URLs instead of signed ones.
    pub fn public(mut self) -> Self {
        self.public = true;
        self
    }

    /// Replace the path function.
    pub fn path_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&C, &UploadMetadata) -> String + Send + Sync + 'static,
    {
        self.path_fn = Arc::new(f);
        self
    }

    /// Add an upload authorization hook. All hooks must allow.
    pub fn on_upload(mut self, hook: impl AuthorizationHook<C> + 'static) -> Self {
        self.before_upload.push(Arc::new(hook));
        self
    }

    /// Add a delete authorization hook.
    pub fn on_delete(mut self, hook: impl AuthorizationHook<C> + 'static) -> Self {
        self.before_delete.push(Arc::new(hook));
        self
    }

    /// Add a read-access authorization hook.
    pub fn on_request_access(mut self, hook: impl AuthorizationHook<C> + 'static) -> Self {
        self.before_request_access.push(Arc::new(hook));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> BucketKind {
        self.kind
    }

    pub fn size_limit(&self) -> Option<u64> {
        self.max_size_bytes
    }

    pub fn is_public(&self) -> bool {
        self.public
    }

    /// Key relative to the bucket for this upload.
    pub(crate) fn relative_key(&self, ctx: &C, meta: &UploadMetadata) -> String {
        (self.path_fn)(ctx, meta)
    }

    pub(crate) async fn authorize_upload(&self, ctx: &C, meta: &UploadMetadata) -> Decision {
        Self::run_hooks(&self.before_upload, ctx, HookTarget::Upload(meta)).await
    }

    pub(crate) async fn authorize_delete(&self, ctx: &C, key: &str) -> Decision {
        Self::run_hooks(&self.before_delete, ctx, HookTarget::Object(key)).await
    }

    pub(crate) async fn authorize_access(&self, ctx: &C, key: &str) -> Decision {
        Self::run_hooks(&self.before_request_access, ctx, HookTarget::Object(key)).await
    }

    /// First denial wins; an empty hook list allows.
    async fn run_hooks(
        hooks: &[Arc<dyn AuthorizationHook<C>>],
        ctx: &C,
        target: HookTarget<'_>,
    ) -> Decision {
        for hook in hooks {
            if let Decision::Deny(reason) = hook.authorize(ctx, target).await {
                return Decision::Deny(reason);
            }
        }
        Decision::Allow
    }
}

impl<C> fmt::Debug for BucketDefinition<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BucketDefinition")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("max_size_bytes", &self.max_size_bytes)
            .field("public", &self.public)
            .field("before_upload", &self.before_upload.len())
            .field("before_delete", &self.before_delete.len())
            .field("before_request_access", &self.before_request_access.len())
            .finish()
    }
}
