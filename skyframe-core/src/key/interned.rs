//! Interned keys.

use std::any::{Any, TypeId};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;

/// Name of a computation family, e.g. `"FILE"` or `"CONFIGURED_TARGET"`.
///
/// Every key carries one. The evaluator uses it to look up the
/// [`Function`](crate::function::Function) that computes the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionName(&'static str);

impl FunctionName {
    /// Create a function name. Usually bound to a `const`.
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    /// Get the name as a string.
    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for FunctionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// A type-erased key argument.
///
/// Implemented for every `Eq + Hash + Debug` type that can be shared between
/// threads, so domain code never implements it by hand.
pub trait KeyArgument: Any + fmt::Debug + Send + Sync {
    /// Upcast for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Equality across erased types. Arguments of different types are never equal.
    fn dyn_eq(&self, other: &dyn KeyArgument) -> bool;

    /// Feed the argument (and its type) into a hasher.
    fn dyn_hash(&self, state: &mut dyn Hasher);
}

impl<T> KeyArgument for T
where
    T: Any + fmt::Debug + Eq + Hash + Send + Sync,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn dyn_eq(&self, other: &dyn KeyArgument) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .map_or(false, |other| other == self)
    }

    fn dyn_hash(&self, mut state: &mut dyn Hasher) {
        TypeId::of::<T>().hash(&mut state);
        self.hash(&mut state);
    }
}

struct KeyInner {
    function: FunctionName,
    argument: Box<dyn KeyArgument>,
    hash: u64,
}

/// Identifier of one unit of computation.
///
/// Cloning is a reference-count bump. Equal `(function, argument)` tuples
/// always produce the same interned key.
///
/// # Example
///
/// ```rust
/// use skyframe_core::key::{FunctionName, Key};
///
/// const FILE: FunctionName = FunctionName::new("FILE");
///
/// let a = Key::new(FILE, "src/main.rs".to_string());
/// let b = Key::new(FILE, "src/main.rs".to_string());
/// assert_eq!(a, b);
/// assert!(a.ptr_eq(&b));
/// ```
#[derive(Clone)]
pub struct Key(Arc<KeyInner>);

// Keys stay alive for the life of the process, like the nodes that use them.
static INTERNER: OnceLock<DashMap<Key, ()>> = OnceLock::new();

fn interner() -> &'static DashMap<Key, ()> {
    INTERNER.get_or_init(DashMap::new)
}

impl Key {
    /// Create (or look up) the key for `function` applied to `argument`.
    pub fn new<A: KeyArgument>(function: FunctionName, argument: A) -> Self {
        let mut hasher = DefaultHasher::new();
        function.hash(&mut hasher);
        argument.dyn_hash(&mut hasher);

        let candidate = Key(Arc::new(KeyInner {
            function,
            argument: Box::new(argument),
            hash: hasher.finish(),
        }));

        interner()
            .entry(candidate)
            .or_insert(())
            .key()
            .clone()
    }

    /// The function name that computes this key.
    pub fn function_name(&self) -> FunctionName {
        self.0.function
    }

    /// Borrow the argument as `T`, if that is its type.
    pub fn argument<T: Any>(&self) -> Option<&T> {
        self.0.argument.as_ref().as_any().downcast_ref::<T>()
    }

    /// Borrow the type-erased argument.
    pub fn raw_argument(&self) -> &dyn KeyArgument {
        self.0.argument.as_ref()
    }

    /// Whether both handles point at the same interned key.
    pub fn ptr_eq(&self, other: &Key) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
            || (self.0.hash == other.0.hash
                && self.0.function == other.0.function
                && self.0.argument.dyn_eq(other.0.argument.as_ref()))
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.hash);
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:?}", self.0.function, self.0.argument)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
