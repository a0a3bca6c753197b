//! Context-bearing callbacks for context-free hardware vectors.
//!
//! Interrupt vectors and several SDK-style callback tables accept a
//! bare `fn()`, with nowhere to hang a context pointer, which makes it
//! impossible to share one handler function between two instances of
//! the same peripheral driver. One classic fix is generating a tiny
//! machine-code stub per registration that loads the context and
//! tail-calls the handler; that buys an unbounded registry at the cost
//! of runtime code generation on an architecture-specific template.
//!
//! This registry takes the bounded, fully-safe route instead: a fixed
//! table of `(handler, context)` slots, each permanently paired with
//! its own monomorphized dispatcher function. Claiming a slot stores
//! the pair and hands back the dispatcher's address, which is an
//! ordinary `fn()` suitable for a vector table.
//!
//! Slots are claimed for the life of the session and never recycled:
//! a vector table may keep the dispatcher address forever, so the
//! binding behind it must stay valid forever too.

use core::sync::atomic::{AtomicUsize, Ordering};

/// Number of registry slots. Sized for the worst-case hardware
/// complement: two quadrature channels, two I2C sensor interrupt
/// lines, and headroom.
pub const SLOTS: usize = 8;

/// Handler signature: a plain function taking the opaque context.
pub type Handler = fn(*mut ());

// A const item makes the array-repeat initializer legal for a
// non-Copy element type.
#[allow(clippy::declare_interior_mutable_const)]
const ZERO: AtomicUsize = AtomicUsize::new(0);

static SLOT_HANDLER: [AtomicUsize; SLOTS] = [ZERO; SLOTS];
static SLOT_CONTEXT: [AtomicUsize; SLOTS] = [ZERO; SLOTS];
static NEXT_SLOT: AtomicUsize = AtomicUsize::new(0);

fn dispatch<const I: usize>() {
    // Acquire pairs with the Release in `claim`: a dispatcher that
    // observes the handler also observes the context stored before it.
    let h = SLOT_HANDLER[I].load(Ordering::Acquire);
    if h != 0 {
        // Safety: the only non-zero values ever stored are `Handler`
        // function pointers, in `claim`.
        let f: Handler = unsafe { core::mem::transmute(h) };
        f(SLOT_CONTEXT[I].load(Ordering::Relaxed) as *mut ());
    }
}

static DISPATCHERS: [fn(); SLOTS] = [
    dispatch::<0>,
    dispatch::<1>,
    dispatch::<2>,
    dispatch::<3>,
    dispatch::<4>,
    dispatch::<5>,
    dispatch::<6>,
    dispatch::<7>,
];

/// Claims a slot, binding `(handler, context)` to it, and returns the
/// context-free dispatcher to hand to the hardware vector. Returns
/// `None` when the table is full.
///
/// The caller must guarantee `context` stays valid for the rest of the
/// session; in practice that means it points into a `static`.
pub fn claim(handler: Handler, context: *mut ()) -> Option<fn()> {
    // Claims happen during single-threaded configuration on core 0,
    // before any claimed vector is unmasked, so a plain load/store
    // allocation suffices (armv6-m has no atomic read-modify-write to
    // do better with anyway). Host tests serialize claims themselves.
    let slot = NEXT_SLOT.load(Ordering::Relaxed);
    if slot >= SLOTS {
        return None;
    }
    NEXT_SLOT.store(slot + 1, Ordering::Relaxed);
    SLOT_CONTEXT[slot].store(context as usize, Ordering::Relaxed);
    SLOT_HANDLER[slot].store(handler as usize, Ordering::Release);
    Some(DISPATCHERS[slot])
}

/// A typed `(handler, context)` pair for [`claim_binding`]. Lives in a
/// caller-provided static, which is what gives the registry its
/// session-lifetime guarantee without an allocator.
pub struct Binding<T: 'static> {
    handler: fn(&'static T),
    context: &'static T,
}

impl<T> Binding<T> {
    pub const fn new(handler: fn(&'static T), context: &'static T) -> Self {
        Binding { handler, context }
    }
}

/// Claims a slot for a typed handler: `handler(context)` runs on every
/// dispatch.
pub fn claim_binding<T: Sync>(binding: &'static Binding<T>) -> Option<fn()> {
    fn trampoline<T: 'static>(p: *mut ()) {
        // Safety: `claim_binding` only ever stores pointers to
        // &'static Binding<T> with this T.
        let b = unsafe { &*(p as *const Binding<T>) };
        (b.handler)(b.context)
    }
    claim(trampoline::<T>, binding as *const Binding<T> as *mut ())
}

#[cfg(test)]
mod tests {
    use super::*;

    static HITS_A: AtomicUsize = AtomicUsize::new(0);
    static HITS_B: AtomicUsize = AtomicUsize::new(0);
    static COUNTER: AtomicUsize = AtomicUsize::new(0);

    fn bump(ctx: *mut ()) {
        let c = unsafe { &*(ctx as *const AtomicUsize) };
        c.fetch_add(1, Ordering::Relaxed);
    }

    fn bump_typed(c: &'static AtomicUsize) {
        c.fetch_add(10, Ordering::Relaxed);
    }

    static BINDING: Binding<AtomicUsize> = Binding::new(bump_typed, &COUNTER);

    // The registry is a process-wide singleton, so all its coverage
    // lives in one test to keep slot consumption deterministic.
    #[test]
    fn registry_dispatch_and_exhaustion() {
        // Two raw claims with distinct contexts dispatch to the same
        // handler but touch their own counters.
        let a = claim(bump, &HITS_A as *const AtomicUsize as *mut ()).unwrap();
        let b = claim(bump, &HITS_B as *const AtomicUsize as *mut ()).unwrap();
        a();
        a();
        b();
        assert_eq!(HITS_A.load(Ordering::Relaxed), 2);
        assert_eq!(HITS_B.load(Ordering::Relaxed), 1);

        // A typed binding routes through its trampoline.
        let t = claim_binding(&BINDING).unwrap();
        t();
        assert_eq!(COUNTER.load(Ordering::Relaxed), 10);

        // Distinct dispatchers per slot.
        assert_ne!(a as usize, b as usize);
        assert_ne!(b as usize, t as usize);

        // Burn the remaining slots; the table then refuses.
        let mut claimed = 3;
        while claim(bump, &HITS_A as *const AtomicUsize as *mut ()).is_some() {
            claimed += 1;
            assert!(claimed <= SLOTS, "registry exceeded its slot count");
        }
        assert_eq!(claimed, SLOTS);
        assert!(claim_binding(&BINDING).is_none());
    }
}
