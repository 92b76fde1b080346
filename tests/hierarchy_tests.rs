//! Scenario tests for synchronous hierarchical machines.

use nestfsm::builder::{MachineBuilder, StateBuilder, TransitionBuilder};
use nestfsm::checkpoint::Checkpoint;
use nestfsm::core::{Action, Guard, HistoryMode, Payload, State};
use nestfsm::model::Model;
use nestfsm::plan::PlanTable;
use nestfsm::runtime::{
    ExceptionDirective, FireOutcome, MachineError, MachineExtension, StateMachine,
    TransitionContext, TransitionStage,
};
use nestfsm::{state_enum, trigger_enum};
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Default)]
struct Trace {
    events: Mutex<Vec<String>>,
}

impl Trace {
    fn push(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }

    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }
}

fn traced<S: State>(state: S) -> StateBuilder<S, Trace> {
    let entered = state.name().to_string();
    let exited = entered.clone();
    StateBuilder::new(state)
        .on_entry(Action::effect(
            format!("enter_{entered}"),
            move |t: &Trace| t.push(format!("enter {entered}")),
        ))
        .on_exit(Action::effect(
            format!("exit_{exited}"),
            move |t: &Trace| t.push(format!("exit {exited}")),
        ))
}

state_enum! {
    #[allow(non_camel_case_types)]
    enum Job {
        Out,
        Work,
        Work_S1,
        Work_S1_Loading,
        Work_S1_Calc,
    }
}

trigger_enum! {
    enum Shift {
        EnterWork,
        Next,
        Abort,
    }
}

fn work_builder() -> MachineBuilder<Job, Shift, Trace> {
    MachineBuilder::new("work")
        .initial(Job::Out)
        .state(traced(Job::Out))
        .state(traced(Job::Work).history(HistoryMode::Deep))
        .state(traced(Job::Work_S1).parent(Job::Work).initial())
        .state(traced(Job::Work_S1_Loading).parent(Job::Work_S1).initial())
        .state(traced(Job::Work_S1_Calc).parent(Job::Work_S1))
        .transition(
            TransitionBuilder::new()
                .from(Job::Out)
                .on(Shift::EnterWork)
                .to(Job::Work),
        )
        .unwrap()
        .transition(
            TransitionBuilder::new()
                .from(Job::Work_S1_Loading)
                .on(Shift::Next)
                .to(Job::Work_S1_Calc),
        )
        .unwrap()
        .transition(
            TransitionBuilder::new()
                .from(Job::Work)
                .on(Shift::Abort)
                .to(Job::Out),
        )
        .unwrap()
}

fn work_machine() -> StateMachine<Job, Shift, Trace> {
    StateMachine::new(work_builder().build().unwrap(), Trace::default()).unwrap()
}

#[test]
fn work_hierarchy_exposes_dense_arrays() {
    let machine = work_machine();
    let arrays = machine.definition().table().dense_arrays();

    assert_eq!(arrays.parent, vec![-1, -1, 1, 2, 2]);
    assert_eq!(arrays.initial_child, vec![-1, 2, 3, -1, -1]);
    assert_eq!(arrays.depth, vec![0, 0, 1, 2, 2]);
    assert_eq!(arrays.history[1], HistoryMode::Deep);
}

#[test]
fn deep_history_restores_exact_leaf() {
    init_tracing();
    let mut machine = work_machine();
    machine.start().unwrap();
    assert_eq!(machine.context().take(), vec!["enter Out"]);

    machine.fire(&Shift::EnterWork).unwrap();
    assert_eq!(machine.current_state(), Some(&Job::Work_S1_Loading));
    assert_eq!(
        machine.context().take(),
        vec!["exit Out", "enter Work", "enter Work_S1", "enter Work_S1_Loading"]
    );

    machine.fire(&Shift::Next).unwrap();
    assert_eq!(machine.current_state(), Some(&Job::Work_S1_Calc));
    assert_eq!(
        machine.context().take(),
        vec!["exit Work_S1_Loading", "enter Work_S1_Calc"]
    );

    machine.fire(&Shift::Abort).unwrap();
    assert_eq!(machine.current_state(), Some(&Job::Out));
    assert_eq!(
        machine.context().take(),
        vec!["exit Work_S1_Calc", "exit Work_S1", "exit Work", "enter Out"]
    );

    machine.fire(&Shift::EnterWork).unwrap();
    assert_eq!(machine.current_state(), Some(&Job::Work_S1_Calc));
    assert_eq!(
        machine.context().take(),
        vec!["exit Out", "enter Work", "enter Work_S1", "enter Work_S1_Calc"]
    );
    assert_eq!(machine.dump_active_path(), "Work / Work_S1 / Work_S1_Calc");
}

#[test]
fn is_in_covers_active_ancestors() {
    let mut machine = work_machine();
    machine.start().unwrap();
    machine.fire(&Shift::EnterWork).unwrap();

    assert!(machine.is_in(&Job::Work));
    assert!(machine.is_in(&Job::Work_S1));
    assert!(machine.is_in(&Job::Work_S1_Loading));
    assert!(!machine.is_in(&Job::Work_S1_Calc));
    assert!(!machine.is_in(&Job::Out));
    assert_eq!(
        machine.active_path(),
        vec![Job::Work, Job::Work_S1, Job::Work_S1_Loading]
    );
}

#[test]
fn checkpoint_carries_history_to_new_instance() {
    let mut machine = work_machine();
    machine.start().unwrap();
    machine.fire(&Shift::EnterWork).unwrap();
    machine.fire(&Shift::Next).unwrap();
    machine.fire(&Shift::Abort).unwrap();

    let json = machine.checkpoint().to_json().unwrap();
    let checkpoint = Checkpoint::from_json(&json).unwrap();
    let mut restored = StateMachine::restore(
        Arc::clone(machine.definition()),
        Trace::default(),
        &checkpoint,
    )
    .unwrap();

    assert_eq!(restored.instance_id(), machine.instance_id());
    assert_eq!(restored.current_state(), Some(&Job::Out));
    restored.fire(&Shift::EnterWork).unwrap();
    assert_eq!(restored.current_state(), Some(&Job::Work_S1_Calc));
}

#[test]
fn model_round_trips_through_json() {
    let builder = work_builder();
    let model = builder.model();
    let definition = builder.build().unwrap();

    let loaded = Model::from_json(&model.to_json().unwrap()).unwrap();
    let table = PlanTable::build(loaded.clone()).unwrap();

    assert_eq!(loaded, model);
    assert_eq!(table.plans(), definition.table().plans());
}

state_enum! {
    enum Media {
        Outside,
        Panel,
        First,
        Second,
    }
}

trigger_enum! {
    enum Nav {
        Enter,
        Forward,
        Leave,
    }
}

#[test]
fn shallow_history_restores_last_child() {
    let definition = MachineBuilder::<Media, Nav, ()>::new("panel")
        .initial(Media::Panel)
        .state(StateBuilder::new(Media::Outside))
        .state(StateBuilder::new(Media::Panel).history(HistoryMode::Shallow))
        .state(StateBuilder::new(Media::First).parent(Media::Panel).initial())
        .state(StateBuilder::new(Media::Second).parent(Media::Panel))
        .transition(
            TransitionBuilder::new()
                .from(Media::First)
                .on(Nav::Forward)
                .to(Media::Second),
        )
        .unwrap()
        .transition(
            TransitionBuilder::new()
                .from(Media::Panel)
                .on(Nav::Leave)
                .to(Media::Outside),
        )
        .unwrap()
        .transition(
            TransitionBuilder::new()
                .from(Media::Outside)
                .on(Nav::Enter)
                .to(Media::Panel),
        )
        .unwrap()
        .build()
        .unwrap();
    let mut machine = StateMachine::new(definition, ()).unwrap();

    machine.start().unwrap();
    assert_eq!(machine.current_state(), Some(&Media::First));

    machine.fire(&Nav::Forward).unwrap();
    machine.fire(&Nav::Leave).unwrap();
    assert_eq!(machine.current_state(), Some(&Media::Outside));

    machine.fire(&Nav::Enter).unwrap();
    assert_eq!(machine.current_state(), Some(&Media::Second));
}

state_enum! {
    enum Tree {
        Idle,
        Machine,
        Left,
        LeftA,
        LeftB,
        Right,
    }
}

trigger_enum! {
    enum Move {
        Go,
        Jump,
        Reset,
        Halt,
        Tick,
    }
}

fn tree_machine() -> StateMachine<Tree, Move, Trace> {
    let definition = MachineBuilder::new("tree")
        .initial(Tree::Idle)
        .state(traced(Tree::Idle))
        .state(traced(Tree::Machine))
        .state(traced(Tree::Left).parent(Tree::Machine).initial())
        .state(traced(Tree::LeftA).parent(Tree::Left).initial())
        .state(traced(Tree::LeftB).parent(Tree::Left))
        .state(traced(Tree::Right).parent(Tree::Machine))
        .transition(TransitionBuilder::new().from(Tree::Idle).on(Move::Go).to(Tree::Machine))
        .unwrap()
        .transition(
            TransitionBuilder::new()
                .from(Tree::LeftA)
                .on(Move::Jump)
                .to(Tree::Right)
                .then("jump", |t: &Trace| t.push("jump")),
        )
        .unwrap()
        .transition(
            TransitionBuilder::new()
                .from(Tree::Right)
                .on(Move::Reset)
                .to(Tree::Right),
        )
        .unwrap()
        .transition(
            TransitionBuilder::new()
                .from(Tree::Machine)
                .on(Move::Halt)
                .to(Tree::Idle),
        )
        .unwrap()
        .transition(
            TransitionBuilder::new()
                .from(Tree::Left)
                .on(Move::Tick)
                .internal()
                .then("tick", |t: &Trace| t.push("tick")),
        )
        .unwrap()
        .build()
        .unwrap();
    StateMachine::new(definition, Trace::default()).unwrap()
}

#[test]
fn entering_composite_descends_to_initial_leaf() {
    let mut machine = tree_machine();
    machine.start().unwrap();
    machine.context().take();

    machine.fire(&Move::Go).unwrap();

    assert_eq!(
        machine.context().take(),
        vec!["exit Idle", "enter Machine", "enter Left", "enter LeftA"]
    );
    assert_eq!(machine.dump_active_path(), "Machine / Left / LeftA");
}

#[test]
fn transition_exits_to_lca_then_enters() {
    let mut machine = tree_machine();
    machine.start().unwrap();
    machine.fire(&Move::Go).unwrap();
    machine.context().take();

    machine.fire(&Move::Jump).unwrap();

    assert_eq!(
        machine.context().take(),
        vec!["exit LeftA", "exit Left", "jump", "enter Right"]
    );
    assert!(machine.is_in(&Tree::Machine));
}

#[test]
fn external_self_transition_exits_and_reenters() {
    let mut machine = tree_machine();
    machine.start().unwrap();
    machine.fire(&Move::Go).unwrap();
    machine.fire(&Move::Jump).unwrap();
    machine.context().take();

    machine.fire(&Move::Reset).unwrap();

    assert_eq!(machine.context().take(), vec!["exit Right", "enter Right"]);
    assert_eq!(machine.current_state(), Some(&Tree::Right));
}

#[test]
fn ancestor_transition_exits_active_leaf_first() {
    let mut machine = tree_machine();
    machine.start().unwrap();
    machine.fire(&Move::Go).unwrap();
    machine.fire(&Move::Jump).unwrap();
    machine.context().take();

    machine.fire(&Move::Halt).unwrap();

    assert_eq!(
        machine.context().take(),
        vec!["exit Right", "exit Machine", "enter Idle"]
    );
    assert_eq!(machine.current_state(), Some(&Tree::Idle));
}

#[test]
fn internal_transition_runs_action_only() {
    let mut machine = tree_machine();
    machine.start().unwrap();
    machine.fire(&Move::Go).unwrap();
    machine.context().take();

    assert_eq!(
        machine.process(&Move::Tick, None).unwrap(),
        FireOutcome::Internal
    );

    assert_eq!(machine.context().take(), vec!["tick"]);
    assert_eq!(machine.current_state(), Some(&Tree::LeftA));
}

#[test]
fn structural_queries_include_inherited_transitions() {
    let mut machine = tree_machine();
    assert!(machine.defined_triggers().is_empty());

    machine.start().unwrap();
    machine.fire(&Move::Go).unwrap();

    assert_eq!(
        machine.defined_triggers(),
        vec![Move::Jump, Move::Halt, Move::Tick]
    );
    assert!(machine.has_transition(&Move::Halt));
    assert!(!machine.has_transition(&Move::Reset));
}

state_enum! {
    enum Flow {
        Start,
        Left,
        Right,
    }
}

trigger_enum! {
    enum Pick {
        Go,
    }
}

#[test]
fn equal_priority_fires_first_declared() {
    let definition = MachineBuilder::<Flow, Pick, ()>::new("fork")
        .initial(Flow::Start)
        .transition(TransitionBuilder::new().from(Flow::Start).on(Pick::Go).to(Flow::Left))
        .unwrap()
        .transition(TransitionBuilder::new().from(Flow::Start).on(Pick::Go).to(Flow::Right))
        .unwrap()
        .build()
        .unwrap();
    assert_eq!(definition.table().diagnostics().len(), 1);

    let mut machine = StateMachine::new(definition, ()).unwrap();
    machine.start().unwrap();
    machine.fire(&Pick::Go).unwrap();

    assert_eq!(machine.current_state(), Some(&Flow::Left));
}

#[test]
fn higher_priority_wins_over_declaration_order() {
    let definition = MachineBuilder::<Flow, Pick, ()>::new("fork")
        .initial(Flow::Start)
        .transition(TransitionBuilder::new().from(Flow::Start).on(Pick::Go).to(Flow::Left))
        .unwrap()
        .transition(
            TransitionBuilder::new()
                .from(Flow::Start)
                .on(Pick::Go)
                .to(Flow::Right)
                .priority(1),
        )
        .unwrap()
        .build()
        .unwrap();

    let mut machine = StateMachine::new(definition, ()).unwrap();
    machine.start().unwrap();
    machine.fire(&Pick::Go).unwrap();

    assert_eq!(machine.current_state(), Some(&Flow::Right));
}

state_enum! {
    enum Lock {
        Locked,
        Open,
    }
}

trigger_enum! {
    enum Key {
        Unlock,
        Lock,
    }
}

fn keypad() -> StateMachine<Lock, Key, Trace> {
    let definition = MachineBuilder::new("keypad")
        .initial(Lock::Locked)
        .trigger_payload::<u32>(Key::Unlock)
        .state(traced(Lock::Locked))
        .state(traced(Lock::Open))
        .transition(
            TransitionBuilder::new()
                .from(Lock::Locked)
                .on(Key::Unlock)
                .to(Lock::Open)
                .guard(Guard::typed_predicate(
                    "code_matches",
                    |_: &Trace, code: &u32| *code == 1234,
                ))
                .action(Action::typed_effect("log_code", |t: &Trace, code: &u32| {
                    t.push(format!("code {code}"))
                })),
        )
        .unwrap()
        .transition(TransitionBuilder::new().from(Lock::Open).on(Key::Lock).to(Lock::Locked))
        .unwrap()
        .build()
        .unwrap();
    StateMachine::new(definition, Trace::default()).unwrap()
}

#[test]
fn required_payload_guard_without_payload_is_false() {
    let mut machine = keypad();
    machine.start().unwrap();
    machine.context().take();

    assert!(!machine.try_fire(&Key::Unlock).unwrap());
    assert!(!machine.can_fire(&Key::Unlock));
    assert!(machine.context().take().is_empty());
    assert_eq!(machine.current_state(), Some(&Lock::Locked));
}

#[test]
fn payload_selects_outcome() {
    let mut machine = keypad();
    machine.start().unwrap();
    machine.context().take();

    assert_eq!(
        machine
            .process(&Key::Unlock, Some(Payload::new("1234".to_string())))
            .unwrap(),
        FireOutcome::PayloadMismatch
    );
    assert_eq!(
        machine
            .process(&Key::Unlock, Some(Payload::new(1111u32)))
            .unwrap(),
        FireOutcome::GuardRejected
    );
    assert!(machine.context().take().is_empty());

    assert!(machine.can_fire_with(&Key::Unlock, &Payload::new(1234u32)));
    assert!(machine
        .try_fire_with(&Key::Unlock, Payload::new(1234u32))
        .unwrap());
    assert_eq!(
        machine.context().take(),
        vec!["exit Locked", "code 1234", "enter Open"]
    );
}

#[test]
fn fire_distinguishes_missing_route_from_rejection() {
    let mut machine = keypad();
    machine.start().unwrap();

    assert!(matches!(
        machine.fire(&Key::Lock),
        Err(MachineError::NoTransition { .. })
    ));
    assert!(matches!(
        machine.fire(&Key::Unlock),
        Err(MachineError::GuardRejected { .. })
    ));
    assert!(matches!(
        machine.fire_with(&Key::Unlock, Payload::new(-1i64)),
        Err(MachineError::NoTransition { .. })
    ));
}

state_enum! {
    enum Meter {
        Counting,
    }
}

trigger_enum! {
    enum Reading {
        Add,
    }
}

#[test]
fn typed_overload_falls_back_to_plain() {
    let definition = MachineBuilder::<Meter, Reading, ()>::new("meter")
        .initial(Meter::Counting)
        .with_payloads()
        .transition(
            TransitionBuilder::new()
                .from(Meter::Counting)
                .on(Reading::Add)
                .internal()
                .guard(
                    Guard::typed_predicate("below_limit", |_: &(), n: &u32| *n < 10)
                        .or_else(Guard::predicate("no_reading", |_: &()| true)),
                ),
        )
        .unwrap()
        .build()
        .unwrap();
    let mut machine = StateMachine::new(definition, ()).unwrap();
    machine.start().unwrap();

    assert!(machine.can_fire(&Reading::Add));
    assert!(machine.can_fire_with(&Reading::Add, &Payload::new(3u32)));
    assert!(!machine.can_fire_with(&Reading::Add, &Payload::new(50u32)));
    assert!(machine.can_fire_with(&Reading::Add, &Payload::new("text")));
    assert_eq!(machine.permitted_triggers(), vec![Reading::Add]);
}

#[test]
fn guard_errors_fail_closed() {
    let definition = MachineBuilder::<Lock, Key, ()>::new("flaky")
        .initial(Lock::Locked)
        .transition(
            TransitionBuilder::new()
                .from(Lock::Locked)
                .on(Key::Unlock)
                .to(Lock::Open)
                .guard(Guard::sync("sensor", |_: &()| Err("sensor offline".into()))),
        )
        .unwrap()
        .build()
        .unwrap();
    let mut machine = StateMachine::new(definition, ()).unwrap();
    machine.start().unwrap();

    assert!(!machine.can_fire(&Key::Unlock));
    assert!(machine.permitted_triggers().is_empty());
    assert!(!machine.try_fire(&Key::Unlock).unwrap());
    assert_eq!(machine.current_state(), Some(&Lock::Locked));
}

fn failing_entry(handler: Option<ExceptionDirective>) -> StateMachine<Lock, Key, Trace> {
    let mut builder = MachineBuilder::new("jammed")
        .initial(Lock::Locked)
        .state(traced(Lock::Locked))
        .state(
            StateBuilder::new(Lock::Open)
                .on_entry(Action::sync("open_bolt", |_: &Trace| Err("bolt jammed".into()))),
        )
        .transition(
            TransitionBuilder::new()
                .from(Lock::Locked)
                .on(Key::Unlock)
                .to(Lock::Open)
                .then("beep", |t: &Trace| t.push("beep")),
        )
        .unwrap();
    if let Some(directive) = handler {
        builder = builder.on_exception(move |_| directive);
    }
    StateMachine::new(builder.build().unwrap(), Trace::default()).unwrap()
}

#[test]
fn entry_failure_propagates_after_state_changed() {
    let mut machine = failing_entry(None);
    machine.start().unwrap();
    machine.context().take();

    match machine.fire(&Key::Unlock) {
        Err(MachineError::Callback {
            stage,
            callback,
            state,
            source,
        }) => {
            assert_eq!(stage, TransitionStage::OnEntry);
            assert_eq!(callback, "open_bolt");
            assert_eq!(state, "Open");
            assert_eq!(source.to_string(), "bolt jammed");
        }
        other => panic!("Expected callback error, got {other:?}"),
    }
    assert_eq!(machine.context().take(), vec!["exit Locked", "beep"]);
    assert_eq!(machine.current_state(), Some(&Lock::Open));
}

#[test]
fn continue_directive_swallows_callback_errors() {
    let mut machine = failing_entry(Some(ExceptionDirective::Continue));
    machine.start().unwrap();

    assert!(machine.try_fire(&Key::Unlock).unwrap());
    assert_eq!(machine.current_state(), Some(&Lock::Open));
}

#[test]
fn action_failure_leaves_state_unassigned() {
    let definition = MachineBuilder::<Lock, Key, ()>::new("alarm")
        .initial(Lock::Locked)
        .transition(
            TransitionBuilder::new()
                .from(Lock::Locked)
                .on(Key::Unlock)
                .to(Lock::Open)
                .action(Action::sync("disarm", |_: &()| Err("alarm armed".into()))),
        )
        .unwrap()
        .build()
        .unwrap();
    let mut machine = StateMachine::new(definition, ()).unwrap();
    machine.start().unwrap();

    assert!(matches!(
        machine.fire(&Key::Unlock),
        Err(MachineError::Callback {
            stage: TransitionStage::Action,
            ..
        })
    ));
    assert_eq!(machine.current_state(), Some(&Lock::Locked));
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl MachineExtension<Lock, Key> for Recorder {
    fn before_transition(&self, context: &TransitionContext<Lock, Key>) {
        self.events.lock().unwrap().push(format!(
            "before {:?} -> {:?} on {:?}",
            context.from, context.to, context.trigger
        ));
    }

    fn after_transition(&self, _context: &TransitionContext<Lock, Key>, success: bool) {
        self.events
            .lock()
            .unwrap()
            .push(format!("after {success}"));
    }

    fn guard_evaluation(&self, _context: &TransitionContext<Lock, Key>, guard: &str) {
        self.events.lock().unwrap().push(format!("guard {guard}"));
    }

    fn guard_evaluated(&self, _context: &TransitionContext<Lock, Key>, guard: &str, result: bool) {
        self.events
            .lock()
            .unwrap()
            .push(format!("guard {guard} = {result}"));
    }
}

#[test]
fn extensions_observe_each_attempt() {
    let recorder = Arc::new(Recorder::default());
    let mut machine = keypad().with_extension(recorder.clone());
    machine.start().unwrap();

    machine.try_fire(&Key::Unlock).unwrap();
    machine
        .try_fire_with(&Key::Unlock, Payload::new(1234u32))
        .unwrap();

    assert_eq!(
        *recorder.events.lock().unwrap(),
        vec![
            "before Locked -> Open on Unlock",
            "guard code_matches",
            "guard code_matches = false",
            "after false",
            "before Locked -> Open on Unlock",
            "guard code_matches",
            "guard code_matches = true",
            "after true",
        ]
    );
}

state_enum! {
    enum Screen {
        Group,
        Home,
        Detail,
        Summary,
    }
}

trigger_enum! {
    enum Tap {
        Go,
    }
}

#[test]
fn nearest_handler_wins_over_ancestor_priority() {
    let definition = MachineBuilder::<Screen, Tap, ()>::new("panel")
        .initial(Screen::Group)
        .state(StateBuilder::new(Screen::Group))
        .state(StateBuilder::new(Screen::Home).parent(Screen::Group).initial())
        .state(StateBuilder::new(Screen::Detail).parent(Screen::Group))
        .state(StateBuilder::new(Screen::Summary).parent(Screen::Group))
        .transition(TransitionBuilder::new().from(Screen::Home).on(Tap::Go).to(Screen::Detail))
        .unwrap()
        .transition(
            TransitionBuilder::new()
                .from(Screen::Group)
                .on(Tap::Go)
                .to(Screen::Summary)
                .priority(5),
        )
        .unwrap()
        .build()
        .unwrap();
    let mut machine = StateMachine::new(definition, ()).unwrap();
    machine.start().unwrap();

    machine.fire(&Tap::Go).unwrap();
    assert_eq!(machine.current_state(), Some(&Screen::Detail));

    // Detail declares nothing for Go, so the ancestor's transition applies.
    machine.fire(&Tap::Go).unwrap();
    assert_eq!(machine.current_state(), Some(&Screen::Summary));
}
