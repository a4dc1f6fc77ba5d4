//! Type directed dependency injection.
//!
//! A [Collection] is an ordered bag of [Provider]s: constants, functions and wrappers around
//! the rest of the chain. Binding a collection to a signature works out which providers are
//! needed and in which order, splits them into a static phase that runs once and a run phase
//! that runs per invocation, and compiles both into an [Invoker]. Values are matched purely by
//! their Rust type.
//!
//! ```
//! use wrapp_inject::{Collection, Next, Provider};
//!
//! #[derive(Clone, Default, Debug, PartialEq)]
//! struct Request(u32);
//! #[derive(Clone, Default, Debug, PartialEq)]
//! struct Response(u32);
//!
//! let chain = Collection::new("double")
//!     .add(Provider::wrapper("log", |next: Next<(), (Response,)>| {
//!         let (response,) = next.call(());
//!         (response,)
//!     }))
//!     .add(Provider::func("handle", |request: Request| (Response(request.0 * 2),)));
//!
//! let invoker = chain.bind::<(Request,), (Response,)>().unwrap();
//! assert_eq!(invoker.invoke((Request(21),)), (Response(42),));
//! ```

mod binder;
mod cache;
mod characterize;
mod collection;
mod compiler;
mod config;
mod dependency;
mod errors;
mod flows;
mod provider;
mod registry;
mod resolver;
mod types;

pub use binder::{Binder, Initializer, Invoker, Sig};
pub use cache::{KeyFn, KeyPart};
pub use characterize::NodeKey;
pub use collection::{Collection, Item};
pub use compiler::{ChainSummary, EdgeSummary, SlotSummary};
pub use config::InjectConfig;
pub use dependency::{FlowKind, Via};
pub use errors::{
    BindError, CharacterizeError, CompileError, InvokeError, ResolveError, RuleAttempt, RunError,
};
pub use flows::{FlowSet, KeyedFlowSet, Next, ProviderFn, ReturnSet, WrapperFn};
pub use provider::{ClusterId, Provider, ProviderId};
pub use registry::TypeCode;
pub use types::{DynError, Injectable, Outcome, SharedError, TypeInfo, Value};
