//! Subscribe Options
//!
//! `use_subscribe` takes one options value carrying the default, the
//! dependency key and the equality predicate. Callers pick the call shape
//! through a constructor:
//!
//! ```rust,ignore
//! // Default only.
//! SubscribeOptions::with_default(Value::Null)
//!
//! // Full options.
//! SubscribeOptions::with_default(0)
//!     .dependencies([json!(user_id)])
//!     .is_equal(|a, b| a == b)
//! ```
//!
//! [`DefaultOrOptions::sniff`] keeps the older JSON convention working, where
//! one argument could be either a bare default or an options object.

use std::sync::Arc;

use serde_json::Value;
use smallvec::SmallVec;

use crate::source::IsEqual;

/// Dependency key: compared element by element on every render.
pub type Deps = SmallVec<[Value; 4]>;

/// Keys that make a JSON object an options object rather than a default.
pub const RECOGNIZED_KEYS: [&str; 3] = ["default", "isEqual", "dependencies"];

/// Options for one `use_subscribe` call.
pub struct SubscribeOptions<R> {
    default: R,
    dependencies: Deps,
    is_equal: Option<IsEqual<R>>,
}

impl<R> SubscribeOptions<R> {
    /// Options with just a default value.
    pub fn with_default(default: R) -> Self {
        Self {
            default,
            dependencies: Deps::new(),
            is_equal: None,
        }
    }

    /// Resubscribe whenever any of `dependencies` changes.
    pub fn dependencies<I, V>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    /// Suppress results equal to the previously delivered one.
    pub fn is_equal<F>(mut self, is_equal: F) -> Self
    where
        F: Fn(&R, &R) -> bool + Send + Sync + 'static,
    {
        self.is_equal = Some(Arc::new(is_equal));
        self
    }

    /// Value shown while no result has been flushed.
    pub fn default_value(&self) -> &R {
        &self.default
    }

    /// Dependency key compared on every render.
    pub fn deps(&self) -> &Deps {
        &self.dependencies
    }

    /// Equality predicate, if one was set.
    pub fn equality(&self) -> Option<&IsEqual<R>> {
        self.is_equal.as_ref()
    }
}

impl<R: PartialEq + 'static> SubscribeOptions<R> {
    /// Use `PartialEq` as the equality predicate.
    pub fn structural_eq(self) -> Self {
        self.is_equal(|a: &R, b: &R| a == b)
    }
}

impl<R: Default> Default for SubscribeOptions<R> {
    fn default() -> Self {
        Self::with_default(R::default())
    }
}

impl<R: std::fmt::Debug> std::fmt::Debug for SubscribeOptions<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscribeOptions")
            .field("default", &self.default)
            .field("dependencies", &self.dependencies)
            .field("is_equal", &self.is_equal.is_some())
            .finish()
    }
}

/// Either a bare default or a full options value.
pub enum DefaultOrOptions<R> {
    Default(R),
    Options(SubscribeOptions<R>),
}

impl<R> From<DefaultOrOptions<R>> for SubscribeOptions<R> {
    fn from(value: DefaultOrOptions<R>) -> Self {
        match value {
            DefaultOrOptions::Default(default) => SubscribeOptions::with_default(default),
            DefaultOrOptions::Options(options) => options,
        }
    }
}

impl<R> From<SubscribeOptions<R>> for DefaultOrOptions<R> {
    fn from(options: SubscribeOptions<R>) -> Self {
        DefaultOrOptions::Options(options)
    }
}

impl DefaultOrOptions<Value> {
    /// Resolve the JSON call shape.
    ///
    /// A non-null object holding at least one of [`RECOGNIZED_KEYS`] is an
    /// options object; anything else is a literal default. In an options
    /// object a missing `default` is `null`, `dependencies` must be an array
    /// (otherwise it is ignored) and `isEqual: true` selects structural JSON
    /// equality.
    pub fn sniff(value: Value) -> Self {
        let Value::Object(map) = value else {
            return DefaultOrOptions::Default(value);
        };

        if !RECOGNIZED_KEYS.iter().any(|key| map.contains_key(*key)) {
            return DefaultOrOptions::Default(Value::Object(map));
        }

        let default = map.get("default").cloned().unwrap_or(Value::Null);
        let mut options = SubscribeOptions::with_default(default);

        if let Some(Value::Array(dependencies)) = map.get("dependencies") {
            options = options.dependencies(dependencies.iter().cloned());
        }

        if let Some(Value::Bool(true)) = map.get("isEqual") {
            options = options.structural_eq();
        }

        DefaultOrOptions::Options(options)
    }

    /// Whether the value resolved to an options object.
    pub fn is_options(&self) -> bool {
        matches!(self, DefaultOrOptions::Options(_))
    }
}
