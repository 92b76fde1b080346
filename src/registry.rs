//! Per-type machine definitions, built once and shared.
//!
//! A type implementing [`MachineType`] names its state, trigger and context
//! types and knows how to declare itself. The registry builds that
//! declaration on first use and hands the same definition to every
//! instance afterwards.

use crate::builder::{BuildError, MachineBuilder};
use crate::core::{State, Trigger};
use crate::runtime::{AsyncStateMachine, MachineDefinition, StateMachine};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};
use tracing::debug;

/// A machine declared once per Rust type.
///
/// # Example
///
/// ```rust
/// use nestfsm::builder::{MachineBuilder, TransitionBuilder};
/// use nestfsm::registry::{self, MachineType};
/// use nestfsm::{state_enum, trigger_enum};
///
/// state_enum! {
///     pub enum Door { Closed, Open }
/// }
///
/// trigger_enum! {
///     pub enum Push { Open }
/// }
///
/// struct DoorMachine;
///
/// impl MachineType for DoorMachine {
///     type State = Door;
///     type Trigger = Push;
///     type Context = ();
///     const NAME: &'static str = "door";
///
///     fn define() -> MachineBuilder<Door, Push, ()> {
///         MachineBuilder::new(Self::NAME)
///             .initial(Door::Closed)
///             .transition(TransitionBuilder::new().from(Door::Closed).on(Push::Open).to(Door::Open))
///             .expect("valid transition")
///     }
/// }
///
/// let mut door = registry::create::<DoorMachine>(()).unwrap();
/// door.start().unwrap();
/// assert!(door.try_fire(&Push::Open).unwrap());
/// ```
pub trait MachineType: 'static {
    type State: State;
    type Trigger: Trigger;
    type Context: Send + Sync + 'static;

    const NAME: &'static str;

    fn define() -> MachineBuilder<Self::State, Self::Trigger, Self::Context>;
}

type Definition<M> = MachineDefinition<
    <M as MachineType>::State,
    <M as MachineType>::Trigger,
    <M as MachineType>::Context,
>;

type Table = RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>;

fn table() -> &'static Table {
    static DEFINITIONS: OnceLock<Table> = OnceLock::new();
    DEFINITIONS.get_or_init(|| RwLock::new(HashMap::new()))
}

fn cached<M: MachineType>() -> Option<Arc<Definition<M>>> {
    let definitions = table()
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    definitions
        .get(&TypeId::of::<M>())
        .cloned()
        .and_then(|entry| entry.downcast::<Definition<M>>().ok())
}

/// The shared definition for `M`, built on first use.
///
/// Build failures are returned every time and never cached.
pub fn definition<M: MachineType>() -> Result<Arc<Definition<M>>, BuildError> {
    if let Some(definition) = cached::<M>() {
        return Ok(definition);
    }

    let built = M::define().build()?;
    let mut definitions = table()
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    // First registration wins.
    if let Some(existing) = definitions
        .get(&TypeId::of::<M>())
        .cloned()
        .and_then(|entry| entry.downcast::<Definition<M>>().ok())
    {
        return Ok(existing);
    }
    definitions.insert(TypeId::of::<M>(), built.clone());
    debug!(machine = M::NAME, "definition registered");
    Ok(built)
}

/// Create a synchronous instance of `M`.
pub fn create<M: MachineType>(
    context: M::Context,
) -> Result<StateMachine<M::State, M::Trigger, M::Context>, BuildError> {
    StateMachine::new(definition::<M>()?, context)
}

/// Create an asynchronous instance of `M`.
pub fn create_async<M: MachineType>(
    context: M::Context,
) -> Result<AsyncStateMachine<M::State, M::Trigger, M::Context>, BuildError> {
    let definition = definition::<M>()?;
    if !definition.is_asynchronous() {
        return Err(BuildError::SchedulingMismatch {
            machine: definition.name().to_string(),
            asynchronous: false,
        });
    }
    Ok(AsyncStateMachine::new(definition, context))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::TransitionBuilder;
    use crate::{state_enum, trigger_enum};

    state_enum! {
        enum Phase {
            Idle,
            Busy,
        }
    }

    trigger_enum! {
        enum Signal {
            Go,
        }
    }

    struct Worker;

    impl MachineType for Worker {
        type State = Phase;
        type Trigger = Signal;
        type Context = ();
        const NAME: &'static str = "worker";

        fn define() -> MachineBuilder<Phase, Signal, ()> {
            MachineBuilder::new(Self::NAME)
                .initial(Phase::Idle)
                .transition(
                    TransitionBuilder::new()
                        .from(Phase::Idle)
                        .on(Signal::Go)
                        .to(Phase::Busy),
                )
                .unwrap()
        }
    }

    struct AsyncWorker;

    impl MachineType for AsyncWorker {
        type State = Phase;
        type Trigger = Signal;
        type Context = ();
        const NAME: &'static str = "async-worker";

        fn define() -> MachineBuilder<Phase, Signal, ()> {
            Worker::define().asynchronous()
        }
    }

    struct Broken;

    impl MachineType for Broken {
        type State = Phase;
        type Trigger = Signal;
        type Context = ();
        const NAME: &'static str = "broken";

        fn define() -> MachineBuilder<Phase, Signal, ()> {
            MachineBuilder::new(Self::NAME)
        }
    }

    #[test]
    fn definition_is_built_once() {
        let first = definition::<Worker>().unwrap();
        let second = definition::<Worker>().unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.name(), "worker");
    }

    #[test]
    fn create_returns_independent_instances() {
        let mut a = create::<Worker>(()).unwrap();
        let b = create::<Worker>(()).unwrap();

        a.start().unwrap();
        a.fire(&Signal::Go).unwrap();

        assert!(a.is_in(&Phase::Busy));
        assert!(!b.is_started());
        assert_ne!(a.instance_id(), b.instance_id());
    }

    #[test]
    fn async_definitions_need_async_instances() {
        assert!(matches!(
            create::<AsyncWorker>(()),
            Err(BuildError::SchedulingMismatch {
                asynchronous: true,
                ..
            })
        ));
        assert!(create_async::<AsyncWorker>(()).is_ok());
        assert!(matches!(
            create_async::<Worker>(()),
            Err(BuildError::SchedulingMismatch {
                asynchronous: false,
                ..
            })
        ));
    }

    #[test]
    fn build_failures_are_not_cached() {
        assert!(definition::<Broken>().is_err());
        assert!(definition::<Broken>().is_err());
    }
}
