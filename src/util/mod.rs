mod heap;
mod slab;

pub(crate) use self::heap::TimerHeap;
pub(crate) use self::slab::Slab;
