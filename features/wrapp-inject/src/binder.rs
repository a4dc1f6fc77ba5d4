use std::{marker::PhantomData, sync::Arc};

use crate::{
    characterize::{prepare, Endpoint, Signature},
    collection::Collection,
    compiler::{compile, ChainSummary, CompiledChain},
    config::InjectConfig,
    errors::{BindError, InvokeError, RunError},
    flows::{FlowSet, ReturnSet},
    resolver::{reorder, resolve},
    types::Outcome,
};

/// Marks a signature as set on a [Binder]: `In` goes into the chain, `Out` comes back
pub struct Sig<In, Out> {
    _marker: PhantomData<fn(In) -> Out>,
}

impl<In: FlowSet, Out: ReturnSet> Sig<In, Out> {
    fn endpoint() -> Endpoint {
        Endpoint {
            inputs: In::codes(),
            outputs: Out::codes(),
        }
    }
}

/// Typestate builder binding a [Collection].
///
/// `Invoke` and `Init` are `()` until the respective signature was set, which makes
/// [Binder::bind] available only once the invoke signature is known.
///
/// ```
/// # use wrapp_inject::{Collection, Provider};
/// #[derive(Clone, Default)]
/// struct Greeting(String);
///
/// let chain = Collection::new("greet")
///     .add_constant(String::from("world"))
///     .add(Provider::func("greet", |name: String| (Greeting(format!("hello {name}")),)).cacheable())
///     .add(Provider::func("reply", |greeting: Greeting| (greeting,)));
///
/// let invoker = chain.binder().invoke::<(), (Greeting,)>().bind().unwrap();
/// let (greeting,) = invoker.invoke(());
/// assert_eq!(greeting.0, "hello world");
/// ```
pub struct Binder<Invoke, Init> {
    collection: Collection,
    config: InjectConfig,
    _marker: PhantomData<(Invoke, Init)>,
}

// Initial state, no signature set yet
impl Binder<(), ()> {
    pub(crate) fn new(collection: Collection) -> Self {
        Binder {
            collection,
            config: InjectConfig::default(),
            _marker: PhantomData,
        }
    }
}

impl<Invoke, Init> Binder<Invoke, Init> {
    /// Replaces the options used while binding
    pub fn config(mut self, config: InjectConfig) -> Self {
        self.config = config;
        self
    }

    fn with_state<NewInvoke, NewInit>(self) -> Binder<NewInvoke, NewInit> {
        Binder {
            collection: self.collection,
            config: self.config,
            _marker: PhantomData,
        }
    }
}

// Only allow setting the invoke signature once
impl<Init> Binder<(), Init> {
    /// Sets the signature of the per invocation function.
    ///
    /// `In` is made available to the run phase on every call; `Out` is received from the
    /// chain, and reads as `Default::default()` for anything the chain did not return.
    pub fn invoke<In: FlowSet, Out: ReturnSet>(self) -> Binder<Sig<In, Out>, Init> {
        self.with_state()
    }
}

// Only allow setting the init signature once
impl<Invoke> Binder<Invoke, ()> {
    /// Adds an init function, which runs the static phase once with `In` available and returns
    /// `Out` read from the static phase.
    ///
    /// The chain cannot be invoked before init was called.
    pub fn init<In: FlowSet, Out: ReturnSet>(self) -> Binder<Invoke, Sig<In, Out>> {
        self.with_state()
    }
}

impl<In: FlowSet, Out: ReturnSet> Binder<Sig<In, Out>, ()> {
    pub fn bind(self) -> Result<Invoker<In, Out>, BindError> {
        let signature = Signature {
            init: None,
            invoke: Sig::<In, Out>::endpoint(),
        };
        let chain = bind_chain(&self.collection, &signature, &self.config)?;
        Ok(Invoker::new(chain))
    }
}

impl<In, Out, InitIn, InitOut> Binder<Sig<In, Out>, Sig<InitIn, InitOut>>
where
    In: FlowSet,
    Out: ReturnSet,
    InitIn: FlowSet,
    InitOut: ReturnSet,
{
    pub fn bind(self) -> Result<(Invoker<In, Out>, Initializer<InitIn, InitOut>), BindError> {
        let signature = Signature {
            init: Some(Sig::<InitIn, InitOut>::endpoint()),
            invoke: Sig::<In, Out>::endpoint(),
        };
        let chain = bind_chain(&self.collection, &signature, &self.config)?;
        let initializer = Initializer {
            chain: chain.clone(),
            _marker: PhantomData,
        };
        Ok((Invoker::new(chain), initializer))
    }
}

fn bind_chain(
    collection: &Collection,
    signature: &Signature,
    config: &InjectConfig,
) -> Result<Arc<CompiledChain>, BindError> {
    let providers = collection.flatten();
    let prepared = prepare(&providers, signature, config)?;
    let nodes = reorder(prepared.nodes)?;
    let resolution = resolve(&nodes, config)?;
    let mut warnings = prepared.warnings;
    warnings.extend(resolution.warnings.iter().cloned());
    let chain = compile(&nodes, &resolution, signature, warnings)?;

    tracing::debug!(
        "Bound '{}': {} of {} providers included",
        collection.name(),
        chain.summary.included.len(),
        nodes.len()
    );
    Ok(Arc::new(chain))
}

/// The per invocation function of a bound chain.
///
/// Cheap to clone; every clone shares the static phase and the caches of the binding.
pub struct Invoker<In, Out> {
    chain: Arc<CompiledChain>,
    _marker: PhantomData<fn(In) -> Out>,
}

impl<In, Out> Clone for Invoker<In, Out> {
    fn clone(&self) -> Self {
        Self {
            chain: self.chain.clone(),
            _marker: PhantomData,
        }
    }
}

impl<In: FlowSet, Out: ReturnSet> Invoker<In, Out> {
    fn new(chain: Arc<CompiledChain>) -> Self {
        Self {
            chain,
            _marker: PhantomData,
        }
    }

    /// Runs the chain once with `input`
    pub fn try_invoke(&self, input: In) -> Result<Out, InvokeError> {
        let received = self.chain.invoke(input.into_values())?;
        Ok(Out::from_optional(&received))
    }

    /// Like [Invoker::try_invoke]
    ///
    /// # Panics
    /// If the chain has an init function that was not called yet
    pub fn invoke(&self, input: In) -> Out {
        match self.try_invoke(input) {
            Ok(out) => out,
            Err(error) => panic!("{error}"),
        }
    }

    /// Layout of the bound chain
    pub fn summary(&self) -> &ChainSummary {
        &self.chain.summary
    }

    /// Non fatal problems found while binding
    pub fn warnings(&self) -> &[String] {
        &self.chain.warnings
    }
}

/// The init function of a chain bound with [Binder::init]
pub struct Initializer<In, Out> {
    chain: Arc<CompiledChain>,
    _marker: PhantomData<fn(In) -> Out>,
}

impl<In: FlowSet, Out: ReturnSet> Initializer<In, Out> {
    /// Runs the static phase with `input` and returns what the init signature asks for.
    ///
    /// Only the first call runs anything; later calls ignore `input` and return the values of
    /// the first run again.
    pub fn init(&self, input: In) -> Out {
        debug_assert!(self.chain.has_init());
        let returned = self.chain.initialize(input.into_values());
        Out::from_optional(&returned)
    }

    pub fn is_initialized(&self) -> bool {
        self.chain.is_initialized()
    }
}

/// Binds `() -> (Outcome,)` and invokes it once
pub(crate) fn run(collection: &Collection) -> Result<(), RunError> {
    let invoker = collection.bind::<(), (Outcome,)>()?;
    let (outcome,) = invoker.invoke(());
    outcome.into_result().map_err(RunError::Failed)
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{errors::ResolveError, provider::Provider};

    #[derive(Clone, Default, Debug, PartialEq)]
    struct Port(u16);
    #[derive(Clone, Default, Debug, PartialEq)]
    struct Address(String);

    #[test]
    fn binds_and_invokes() {
        let chain = Collection::new("address")
            .add_constant(String::from("localhost"))
            .add(Provider::func("address", |host: String, port: Port| {
                (Address(format!("{host}:{}", port.0)),)
            }))
            .add(Provider::func("reply", |address: Address| (address,)));

        let invoker = chain.bind::<(Port,), (Address,)>().unwrap();
        assert_eq!(invoker.invoke((Port(80),)), (Address("localhost:80".into()),));
        assert_eq!(invoker.invoke((Port(81),)), (Address("localhost:81".into()),));
    }

    #[test]
    fn init_runs_the_static_phase_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = counter.clone();
        let chain = Collection::new("init")
            .add(
                Provider::func("count", move |port: Port| {
                    seen.fetch_add(1, Ordering::SeqCst);
                    (Address(format!(":{}", port.0)),)
                })
                .cacheable(),
            )
            .add(Provider::func("reply", |address: Address| (address,)));

        let (invoker, initializer) = chain
            .binder()
            .invoke::<(), (Address,)>()
            .init::<(Port,), (Address,)>()
            .bind()
            .unwrap();

        assert_eq!(invoker.try_invoke(()), Err(InvokeError::NotInitialized));
        assert!(!initializer.is_initialized());
        assert_eq!(initializer.init((Port(1),)), (Address(":1".into()),));
        assert_eq!(initializer.init((Port(2),)), (Address(":1".into()),));
        assert_eq!(invoker.invoke(()), (Address(":1".into()),));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn run_reports_failures() {
        let failing = Collection::new("failing")
            .add(Provider::fallible("fail", || Err::<(), _>("no database")))
            .add(Provider::func("never", || ()));
        match failing.run() {
            Err(RunError::Failed(error)) => assert_eq!(error.to_string(), "no database"),
            other => panic!("expected a failure, got {other:?}"),
        }

        let missing = Collection::new("missing").add(Provider::func("needs port", |_: Port| ()));
        assert!(matches!(
            missing.run(),
            Err(RunError::Bind(BindError::Resolve(ResolveError::RequiredExcluded { .. })))
        ));
    }
}
