use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use crate::{
    cache::KeyFn,
    compiler::ErasedNext,
    flows::{FlowSet, KeyedFlowSet, Next, ProviderFn, ReturnSet, WrapperFn},
    registry::TypeCode,
    types::{downcast_value, erase, DynError, Injectable, Value},
};

/// Erased function provider: inputs in, outputs out
pub(crate) type FuncImpl = Arc<dyn Fn(&[Value]) -> Result<Vec<Value>, DynError> + Send + Sync>;
/// Erased wrapper provider: continuation and inputs in, returns out
pub(crate) type WrapImpl = Arc<dyn Fn(ErasedNext, &[Value]) -> Vec<Value> + Send + Sync>;
/// Erased conversion of a loose producer's output into an interface type
pub(crate) type Converter = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Identity of a provider's callable
///
/// Annotating a provider copies it but keeps the id, so caches keyed by it are shared
/// between every copy and every collection the provider ends up in.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProviderId(u64);

impl ProviderId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifier shared by providers that are included or excluded together
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ClusterId(u32);

impl ClusterId {
    /// Returns a cluster id never handed out before
    pub fn new() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self(u32::try_from(NEXT.fetch_add(1, Ordering::Relaxed)).expect("fewer than u32::MAX clusters"))
    }
}

impl Default for ClusterId {
    fn default() -> Self {
        Self::new()
    }
}

/// The call shape captured when the provider was constructed
pub(crate) enum Shape {
    Constant {
        code: TypeCode,
        value: Value,
    },
    Func {
        inputs: Vec<TypeCode>,
        results: Vec<TypeCode>,
        fallible: bool,
        /// Present when every input can be used as a memoization key
        keys: Option<Arc<[KeyFn]>>,
        call: FuncImpl,
    },
    Wrapper {
        inputs: Vec<TypeCode>,
        /// What the wrapper passes to the rest of the chain
        down: Vec<TypeCode>,
        /// What the wrapper gets back from the rest of the chain
        up: Vec<TypeCode>,
        returns: Vec<TypeCode>,
        call: WrapImpl,
    },
}

impl Shape {
    pub(crate) fn inputs(&self) -> &[TypeCode] {
        match self {
            Shape::Constant { .. } => &[],
            Shape::Func { inputs, .. } | Shape::Wrapper { inputs, .. } => inputs,
        }
    }

    pub(crate) fn describe(&self) -> &'static str {
        match self {
            Shape::Constant { .. } => "constant",
            Shape::Func { fallible: false, .. } => "function",
            Shape::Func { fallible: true, .. } => "fallible function",
            Shape::Wrapper { .. } => "wrapper",
        }
    }
}

/// User set attributes, consumed by the characterizer and the resolver
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Annotations {
    pub required: bool,
    pub desired: bool,
    pub shun: bool,
    pub cacheable: bool,
    pub must_cache: bool,
    pub not_cacheable: bool,
    pub memoize: bool,
    pub singleton: bool,
    pub loose: bool,
    pub must_consume: bool,
    pub consumption_optional: bool,
    pub cluster: Option<ClusterId>,
    pub reorder: bool,
    pub non_final: bool,
    pub calls_inner: bool,
}

/// Declared conversion from one of a loose provider's outputs into another type
#[derive(Clone)]
pub(crate) struct Upcast {
    pub from: TypeCode,
    pub to: TypeCode,
    pub convert: Converter,
}

/// A unit of work participating in chain resolution.
///
/// Providers are immutable: every annotation method returns an annotated copy.
#[derive(Clone)]
pub struct Provider {
    pub(crate) id: ProviderId,
    pub(crate) name: Arc<str>,
    pub(crate) shape: Arc<Shape>,
    pub(crate) annotations: Annotations,
    pub(crate) upcasts: Arc<[Upcast]>,
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("shape", &self.shape.describe())
            .field("annotations", &self.annotations)
            .finish()
    }
}

// Constructors
impl Provider {
    fn from_shape(name: impl Into<String>, shape: Shape) -> Self {
        Self {
            id: ProviderId::next(),
            name: Arc::from(name.into()),
            shape: Arc::new(shape),
            annotations: Annotations::default(),
            upcasts: Arc::from(Vec::new()),
        }
    }

    /// A literal value made available to every provider after it
    pub fn constant<T: Injectable>(value: T) -> Self {
        Self::from_shape(
            std::any::type_name::<T>(),
            Shape::Constant {
                code: TypeCode::of::<T>(),
                value: erase(value),
            },
        )
    }

    /// A function consuming the tuple `Args` and producing the tuple `Out`
    ///
    /// Depending on its position and annotations it becomes a static injector, a per
    /// invocation injector or the final provider of the chain.
    pub fn func<Args, Out, F>(name: impl Into<String>, func: F) -> Self
    where
        Args: FlowSet,
        Out: FlowSet,
        F: ProviderFn<Args, Out>,
    {
        let call: FuncImpl = Arc::new(move |values: &[Value]| {
            Ok::<_, DynError>(func.call(Args::from_values(values)).into_values())
        });
        Self::from_shape(
            name,
            Shape::Func {
                inputs: Args::codes(),
                results: Out::codes(),
                fallible: false,
                keys: None,
                call,
            },
        )
    }

    /// Like [Provider::func], for inputs that can serve as a memoization key
    pub fn keyed_func<Args, Out, F>(name: impl Into<String>, func: F) -> Self
    where
        Args: KeyedFlowSet,
        Out: FlowSet,
        F: ProviderFn<Args, Out>,
    {
        let mut provider = Self::func(name, func);
        if let Shape::Func { keys, .. } = Arc::get_mut(&mut provider.shape)
            .expect("a freshly constructed provider is not shared")
        {
            *keys = Some(Arc::from(Args::key_fns()));
        }
        provider
    }

    /// A function that may fail.
    ///
    /// An error stops the rest of the current phase and travels up as an
    /// [Outcome](crate::types::Outcome).
    pub fn fallible<Args, Out, E, F>(name: impl Into<String>, func: F) -> Self
    where
        Args: FlowSet,
        Out: FlowSet,
        E: Into<DynError>,
        F: ProviderFn<Args, Result<Out, E>>,
    {
        let call: FuncImpl = Arc::new(move |values: &[Value]| {
            match func.call(Args::from_values(values)) {
                Ok(out) => Ok(out.into_values()),
                Err(error) => Err::<Vec<Value>, DynError>(error.into()),
            }
        });
        Self::from_shape(
            name,
            Shape::Func {
                inputs: Args::codes(),
                results: Out::codes(),
                fallible: true,
                keys: None,
                call,
            },
        )
    }

    /// Like [Provider::fallible], for inputs that can serve as a memoization key
    pub fn keyed_fallible<Args, Out, E, F>(name: impl Into<String>, func: F) -> Self
    where
        Args: KeyedFlowSet,
        Out: FlowSet,
        E: Into<DynError>,
        F: ProviderFn<Args, Result<Out, E>>,
    {
        let mut provider = Self::fallible(name, func);
        if let Shape::Func { keys, .. } = Arc::get_mut(&mut provider.shape)
            .expect("a freshly constructed provider is not shared")
        {
            *keys = Some(Arc::from(Args::key_fns()));
        }
        provider
    }

    /// A wrapper around the rest of the chain.
    ///
    /// The first argument is the continuation: calling it runs every provider after the
    /// wrapper with `Down` added to the available values and returns `Up`.
    pub fn wrapper<Down, Up, Args, Ret, F>(name: impl Into<String>, func: F) -> Self
    where
        Down: FlowSet,
        Up: ReturnSet,
        Args: FlowSet,
        Ret: FlowSet,
        F: WrapperFn<Down, Up, Args, Ret>,
    {
        let call: WrapImpl = Arc::new(move |next: ErasedNext, values: &[Value]| {
            func.call(Next::new(next), Args::from_values(values))
                .into_values()
        });
        Self::from_shape(
            name,
            Shape::Wrapper {
                inputs: Args::codes(),
                down: Down::codes(),
                up: Up::codes(),
                returns: Ret::codes(),
                call,
            },
        )
    }
}

// Annotations
impl Provider {
    pub fn id(&self) -> ProviderId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Renames the provider, the identity is kept
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Arc::from(name.into());
        self
    }

    /// Binding fails unless this provider is included
    pub fn required(mut self) -> Self {
        self.annotations.required = true;
        self
    }

    /// Include this provider whenever the chain stays valid with it
    pub fn desired(mut self) -> Self {
        self.annotations.desired = true;
        self
    }

    /// Exclude this provider unless something required or desired cannot do without it
    pub fn shun(mut self) -> Self {
        self.annotations.shun = true;
        self
    }

    /// Run once per binding when all inputs are available before the first invocation
    pub fn cacheable(mut self) -> Self {
        self.annotations.cacheable = true;
        self
    }

    /// Like [Provider::cacheable], but binding fails if the provider cannot run statically
    pub fn must_cache(mut self) -> Self {
        self.annotations.must_cache = true;
        self
    }

    /// Never run statically, even when all inputs would allow it
    pub fn not_cacheable(mut self) -> Self {
        self.annotations.not_cacheable = true;
        self
    }

    /// Share results between bindings: the provider runs once per distinct input key.
    ///
    /// Only valid for providers built with [Provider::keyed_func] or
    /// [Provider::keyed_fallible]; implies [Provider::must_cache].
    ///
    /// The provider may invoke other chains containing itself, as long as it does not ask for
    /// the key it is computing: that call blocks forever, or panics, because it waits on its
    /// own result.
    pub fn memoize(mut self) -> Self {
        self.annotations.memoize = true;
        self
    }

    /// Run once for the whole process regardless of inputs; implies [Provider::must_cache].
    ///
    /// The provider must not invoke a chain containing itself while it runs.
    pub fn singleton(mut self) -> Self {
        self.annotations.singleton = true;
        self
    }

    /// Allow declared [upcasts](Provider::upcast) to satisfy inputs that have no exact producer
    pub fn loose(mut self) -> Self {
        self.annotations.loose = true;
        self
    }

    /// Exclude the provider unless every output is consumed by a later provider
    pub fn must_consume(mut self) -> Self {
        self.annotations.must_consume = true;
        self
    }

    /// Allow returned values (or the failure outcome) to go unreceived
    pub fn consumption_optional(mut self) -> Self {
        self.annotations.consumption_optional = true;
        self
    }

    /// Include or exclude this provider together with every other member of `cluster`
    pub fn in_cluster(mut self, cluster: ClusterId) -> Self {
        self.annotations.cluster = Some(cluster);
        self
    }

    /// Let the resolver move the provider to the earliest point where its inputs exist
    pub fn reorder(mut self) -> Self {
        self.annotations.reorder = true;
        self
    }

    /// Never treat this provider as the final provider, even when it comes last
    pub fn non_final(mut self) -> Self {
        self.annotations.non_final = true;
        self
    }

    /// Declares that a wrapper always calls its continuation
    pub fn calls_inner(mut self) -> Self {
        self.annotations.calls_inner = true;
        self
    }

    /// Declares that output `From` can satisfy inputs of type `To` when the provider is
    /// [loose](Provider::loose)
    ///
    /// Typically `To` is a trait object: `|g: &English| Arc::new(g.clone()) as Arc<dyn Greeter>`
    pub fn upcast<From, To, C>(mut self, convert: C) -> Self
    where
        From: Injectable,
        To: Injectable,
        C: Fn(&From) -> To + Send + Sync + 'static,
    {
        let convert: Converter = Arc::new(move |value: &Value| {
            erase(convert(&downcast_value::<From>(value)))
        });
        let mut upcasts = self.upcasts.to_vec();
        upcasts.push(Upcast {
            from: TypeCode::of::<From>(),
            to: TypeCode::of::<To>(),
            convert,
        });
        self.upcasts = Arc::from(upcasts);
        self
    }
}
