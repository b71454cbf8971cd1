//! Typed event-handler binding.
//!
//! User handlers come in two shapes: a *raw* closure taking the ordered
//! payload list, or a *typed* closure whose positional parameters are
//! decoded from the corresponding payloads. [`IntoEventHandler`] adapts
//! either into the uniform raw shape the dispatcher invokes.
//!
//! Typed binding rules: if the payload list is shorter than the
//! parameter list, or any payload fails to decode into its declared
//! type, the invocation is skipped and logged; extra payloads beyond the
//! declared parameters are dropped silently. Every invocation decodes
//! afresh, so decoded values never alias across calls.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::payload::Payload;

/// The uniform handler shape stored in handler tables: a shared closure
/// over the ordered payload list.
pub type RawHandler = Arc<dyn Fn(Vec<Payload>) + Send + Sync>;

/// Marker for the raw `Fn(Vec<Payload>)` handler shape.
pub struct RawArgs(());

/// Marker for typed handler shapes, parameterized by the argument tuple.
pub struct TypedArgs<T>(PhantomData<T>);

/// Conversion from a user-supplied handler into the uniform raw shape.
///
/// The `Marker` parameter only disambiguates overlapping closure shapes;
/// callers never name it.
pub trait IntoEventHandler<Marker>: Send + Sync + 'static {
    fn into_event_handler(self) -> RawHandler;
}

impl<F> IntoEventHandler<RawArgs> for F
where
    F: Fn(Vec<Payload>) + Send + Sync + 'static,
{
    fn into_event_handler(self) -> RawHandler {
        Arc::new(self)
    }
}

macro_rules! impl_typed_handler {
    ($(($($arg:ident : $idx:tt),*)),+ $(,)?) => {
        $(
            impl<F, $($arg,)*> IntoEventHandler<TypedArgs<($($arg,)*)>> for F
            where
                F: Fn($($arg),*) + Send + Sync + 'static,
                $($arg: DeserializeOwned + Send + 'static,)*
            {
                fn into_event_handler(self) -> RawHandler {
                    Arc::new(move |payloads: Vec<Payload>| {
                        const EXPECTED: usize = impl_typed_handler!(@count $($arg)*);
                        if payloads.len() < EXPECTED {
                            tracing::error!(
                                expected = EXPECTED,
                                got = payloads.len(),
                                "skipping handler: not enough payloads"
                            );
                            return;
                        }
                        #[allow(non_snake_case, unused_variables)]
                        let ($($arg,)*) = ($(
                            match payloads[$idx].decode::<$arg>() {
                                Ok(value) => value,
                                Err(e) => {
                                    tracing::error!(
                                        index = $idx,
                                        error = %e,
                                        "skipping handler: payload decode failed"
                                    );
                                    return;
                                }
                            },
                        )*);
                        (self)($($arg),*);
                    })
                }
            }
        )+
    };
    (@count) => { 0 };
    (@count $head:ident $($tail:ident)*) => { 1 + impl_typed_handler!(@count $($tail)*) };
}

impl_typed_handler!(
    (),
    (A0: 0),
    (A0: 0, A1: 1),
    (A0: 0, A1: 1, A2: 2),
    (A0: 0, A1: 1, A2: 2, A3: 3),
    (A0: 0, A1: 1, A2: 2, A3: 3, A4: 4),
    (A0: 0, A1: 1, A2: 2, A3: 3, A4: 4, A5: 5),
    (A0: 0, A1: 1, A2: 2, A3: 3, A4: 4, A5: 5, A6: 6),
    (A0: 0, A1: 1, A2: 2, A3: 3, A4: 4, A5: 5, A6: 6, A7: 7),
);
