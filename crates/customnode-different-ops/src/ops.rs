//! The closed set of elementwise operations, defined by a single table.
//!
//! Declaration order fixes each operation's index, which is also its row in
//! the results tensor and the position of its factor in `op_factors`.

macro_rules! operations {
    ($($variant:ident => $label:literal, $apply:expr;)+) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub enum Operation {
            $($variant,)+
        }

        impl Operation {
            pub const ALL: &[Operation] = &[$(Operation::$variant,)+];

            pub fn name(self) -> &'static str {
                match self {
                    $(Operation::$variant => $label,)+
                }
            }

            /// IEEE-754 semantics throughout: dividing by zero yields an
            /// infinity or NaN, never an error.
            pub fn apply(self, value: f32, factor: f32) -> f32 {
                let apply: fn(f32, f32) -> f32 = match self {
                    $(Operation::$variant => $apply,)+
                };
                apply(value, factor)
            }
        }
    };
}

operations! {
    Add => "add", |v, f| v + f;
    Subtract => "subtract", |v, f| v - f;
    Multiply => "multiply", |v, f| v * f;
    Divide => "divide", |v, f| v / f;
}

/// Number of operations; both an array bound and the required length of
/// the factors input.
pub const OP_COUNT: usize = Operation::ALL.len();

impl Operation {
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
