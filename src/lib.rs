//! Nestfsm: hierarchical state machines with precomputed transition plans
//!
//! Every transition is planned once, when the machine is built: the exact
//! exits, action, state assignment and entries it performs. Instances then
//! replay those plans, resolving only what depends on their own history.
//!
//! # Core Concepts
//!
//! - **Hierarchy**: states nest under composites; instances are always in a leaf
//! - **Plans**: ordered steps per transition, computed from the lowest common ancestor
//! - **History**: composites can remember their last active child (shallow) or leaf (deep)
//! - **Guards and payloads**: callbacks may take a typed payload carried by the trigger
//! - **Scheduling**: `StateMachine` for synchronous use, `AsyncStateMachine` for tasks
//!
//! # Example
//!
//! ```rust
//! use nestfsm::builder::{MachineBuilder, StateBuilder, TransitionBuilder};
//! use nestfsm::core::HistoryMode;
//! use nestfsm::runtime::StateMachine;
//! use nestfsm::{state_enum, trigger_enum};
//!
//! state_enum! {
//!     enum Player { Stopped, Active, Playing, Paused }
//! }
//!
//! trigger_enum! {
//!     enum Button { Play, Pause, Stop }
//! }
//!
//! let definition = MachineBuilder::<Player, Button, ()>::new("player")
//!     .initial(Player::Stopped)
//!     .state(StateBuilder::new(Player::Active).history(HistoryMode::Shallow))
//!     .state(StateBuilder::new(Player::Playing).parent(Player::Active).initial())
//!     .state(StateBuilder::new(Player::Paused).parent(Player::Active))
//!     .transition(TransitionBuilder::new().from(Player::Stopped).on(Button::Play).to(Player::Active))?
//!     .transition(TransitionBuilder::new().from(Player::Playing).on(Button::Pause).to(Player::Paused))?
//!     .transition(TransitionBuilder::new().from(Player::Active).on(Button::Stop).to(Player::Stopped))?
//!     .build()?;
//!
//! let mut player = StateMachine::new(definition, ())?;
//! player.start()?;
//! player.fire(&Button::Play)?;
//! player.fire(&Button::Pause)?;
//! player.fire(&Button::Stop)?;
//! player.fire(&Button::Play)?;
//!
//! assert_eq!(player.dump_active_path(), "Active / Paused");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod builder;
pub mod checkpoint;
pub mod core;
pub mod model;
pub mod plan;
pub mod registry;
pub mod runtime;

// Re-export commonly used types
pub use builder::{BuildError, MachineBuilder, StateBuilder, TransitionBuilder};
pub use core::{Action, Guard, HistoryMode, Payload, State, StateId, Trigger};
pub use runtime::{AsyncStateMachine, MachineError, StateMachine};
