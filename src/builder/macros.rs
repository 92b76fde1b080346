//! Macros for ergonomic machine construction.

/// Generate a `State` implementation for a fieldless enum.
///
/// # Example
///
/// ```
/// use nestfsm::core::State;
/// use nestfsm::state_enum;
///
/// state_enum! {
///     pub enum Phase {
///         Idle,
///         Working,
///         Done,
///     }
/// }
///
/// assert_eq!(Phase::Working.name(), "Working");
/// ```
#[macro_export]
macro_rules! state_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $(
                $(#[$variant_meta:meta])*
                $variant:ident
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
        $vis enum $name {
            $(
                $(#[$variant_meta])*
                $variant
            ),*
        }

        impl $crate::core::State for $name {
            fn name(&self) -> &str {
                match self {
                    $(Self::$variant => stringify!($variant)),*
                }
            }
        }
    };
}

/// Generate a `Trigger` implementation for a fieldless enum.
///
/// # Example
///
/// ```
/// use nestfsm::core::Trigger;
/// use nestfsm::trigger_enum;
///
/// trigger_enum! {
///     pub enum Command {
///         Begin,
///         Finish,
///     }
/// }
///
/// assert_eq!(Command::Finish.name(), "Finish");
/// ```
#[macro_export]
macro_rules! trigger_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $(
                $(#[$variant_meta:meta])*
                $variant:ident
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
        $vis enum $name {
            $(
                $(#[$variant_meta])*
                $variant
            ),*
        }

        impl $crate::core::Trigger for $name {
            fn name(&self) -> &str {
                match self {
                    $(Self::$variant => stringify!($variant)),*
                }
            }
        }
    };
}
