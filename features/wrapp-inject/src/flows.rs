//! Typed edges of the engine.
//!
//! Providers are written as ordinary closures over tuples of [Injectable] values. The traits in
//! this module describe those tuples ([FlowSet], [ReturnSet], [KeyedFlowSet]) and closures
//! ([ProviderFn], [WrapperFn]) for arities 0 to 8, and erase them to positional value slices.

use std::{hash::Hash, marker::PhantomData};

use crate::{
    cache::{key_part, KeyFn},
    compiler::ErasedNext,
    registry::TypeCode,
    types::{downcast_value, erase, Injectable, Value},
};

/// A tuple of injectable values flowing through the chain
pub trait FlowSet: Sized + Send + 'static {
    /// Number of values in the tuple
    const ARITY: usize;

    /// Type codes of the tuple members, in order
    fn codes() -> Vec<TypeCode>;

    /// Rebuilds the tuple from erased values
    ///
    /// # Panics
    /// If the values do not match the tuple's types, which the compiler rules out
    fn from_values(values: &[Value]) -> Self;

    fn into_values(self) -> Vec<Value>;
}

/// A tuple of values flowing back up the chain.
///
/// Upward slots can stay empty (a wrapper did not call its continuation, a provider failed),
/// so every member needs a zero value.
pub trait ReturnSet: FlowSet {
    fn from_optional(values: &[Option<Value>]) -> Self;
}

/// A tuple whose members can be used as a memoization key
pub trait KeyedFlowSet: FlowSet {
    fn key_fns() -> Vec<KeyFn>;
}

macro_rules! impl_flow_set {
    ($arity:expr; $($name:ident : $idx:tt),*) => {
        impl<$($name: Injectable),*> FlowSet for ($($name,)*) {
            const ARITY: usize = $arity;

            fn codes() -> Vec<TypeCode> {
                vec![$(TypeCode::of::<$name>()),*]
            }

            #[allow(unused_variables)]
            fn from_values(values: &[Value]) -> Self {
                ($(downcast_value::<$name>(&values[$idx]),)*)
            }

            fn into_values(self) -> Vec<Value> {
                vec![$(erase(self.$idx)),*]
            }
        }

        impl<$($name: Injectable + Default),*> ReturnSet for ($($name,)*) {
            #[allow(unused_variables)]
            fn from_optional(values: &[Option<Value>]) -> Self {
                ($(values[$idx].as_ref().map(downcast_value::<$name>).unwrap_or_default(),)*)
            }
        }

        impl<$($name: Injectable + Hash + Eq),*> KeyedFlowSet for ($($name,)*) {
            fn key_fns() -> Vec<KeyFn> {
                vec![$(key_part::<$name> as KeyFn),*]
            }
        }
    };
}

impl_flow_set!(0;);
impl_flow_set!(1; A: 0);
impl_flow_set!(2; A: 0, B: 1);
impl_flow_set!(3; A: 0, B: 1, C: 2);
impl_flow_set!(4; A: 0, B: 1, C: 2, D: 3);
impl_flow_set!(5; A: 0, B: 1, C: 2, D: 3, E: 4);
impl_flow_set!(6; A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);
impl_flow_set!(7; A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6);
impl_flow_set!(8; A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7);

/// Any closure taking up to 8 injectable arguments
///
/// `Args` is the tuple of argument types, `Out` whatever the closure returns.
pub trait ProviderFn<Args, Out>: Send + Sync + 'static {
    fn call(&self, args: Args) -> Out;
}

/// Any closure taking a [Next] continuation followed by up to 8 injectable arguments
pub trait WrapperFn<Down, Up, Args, Ret>: Send + Sync + 'static {
    fn call(&self, next: Next<Down, Up>, args: Args) -> Ret;
}

macro_rules! impl_provider_fns {
    ($($name:ident),*) => {
        impl<Func, Out, $($name),*> ProviderFn<($($name,)*), Out> for Func
        where
            Func: Fn($($name),*) -> Out + Send + Sync + 'static,
        {
            #[allow(non_snake_case)]
            fn call(&self, ($($name,)*): ($($name,)*)) -> Out {
                (self)($($name),*)
            }
        }

        impl<Func, Down, Up, Ret, $($name),*> WrapperFn<Down, Up, ($($name,)*), Ret> for Func
        where
            Func: Fn(Next<Down, Up>, $($name),*) -> Ret + Send + Sync + 'static,
        {
            #[allow(non_snake_case)]
            fn call(&self, next: Next<Down, Up>, ($($name,)*): ($($name,)*)) -> Ret {
                (self)(next, $($name),*)
            }
        }
    };
}

impl_provider_fns!();
impl_provider_fns!(A);
impl_provider_fns!(A, B);
impl_provider_fns!(A, B, C);
impl_provider_fns!(A, B, C, D);
impl_provider_fns!(A, B, C, D, E);
impl_provider_fns!(A, B, C, D, E, F);
impl_provider_fns!(A, B, C, D, E, F, G);
impl_provider_fns!(A, B, C, D, E, F, G, H);

/// Continuation handed to a wrapper: "the rest of the chain".
///
/// `Down` is the tuple the wrapper passes to the providers after it, `Up` the tuple it gets
/// back. A wrapper may call the continuation any number of times, including never; in that case
/// everything the rest of the chain would have returned reaches the wrapper's callers as
/// `Default::default()`.
pub struct Next<Down, Up> {
    inner: ErasedNext,
    _marker: PhantomData<fn(Down) -> Up>,
}

impl<Down, Up> Clone for Next<Down, Up> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _marker: PhantomData,
        }
    }
}

impl<Down: FlowSet, Up: ReturnSet> Next<Down, Up> {
    pub(crate) fn new(inner: ErasedNext) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    /// Runs the rest of the chain with `down` added to the values already available
    pub fn call(&self, down: Down) -> Up {
        let received = self.inner.call(down.into_values());
        Up::from_optional(&received)
    }

    /// Number of times the continuation ran so far
    pub fn calls(&self) -> usize {
        self.inner.calls()
    }
}
