//! Object pools for per-frame scratch geometry.
//!
//! The render path borrows points, rectangles and transforms many times per
//! frame; pooling keeps that churn off the allocator. Pools are
//! single-threaded (handles are `Rc<RefCell<T>>`) and shared by `&self`.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use kurbo::{Affine, Point, Rect};
use log::warn;

/// Default cap on how many released objects a pool retains.
pub const DEFAULT_MAX_POOL_SIZE: usize = 100;

/// A value that can live in an [`ObjectPool`].
pub trait Poolable {
    /// Return the value to its pristine state.
    fn reset(&mut self);
    /// Whether the value is currently borrowed from a pool.
    fn in_use(&self) -> bool;
    fn set_in_use(&mut self, in_use: bool);
}

/// Shared handle to a pooled object.
pub type PoolHandle<T> = Rc<RefCell<T>>;

/// Pooled scratch point.
#[derive(Debug, Clone, Copy)]
pub struct ScratchPoint {
    pub point: Point,
    in_use: bool,
}

impl Default for ScratchPoint {
    fn default() -> Self {
        Self { point: Point::ZERO, in_use: false }
    }
}

impl Poolable for ScratchPoint {
    fn reset(&mut self) {
        self.point = Point::ZERO;
    }
    fn in_use(&self) -> bool {
        self.in_use
    }
    fn set_in_use(&mut self, in_use: bool) {
        self.in_use = in_use;
    }
}

/// Pooled scratch rectangle.
#[derive(Debug, Clone, Copy)]
pub struct ScratchRect {
    pub rect: Rect,
    in_use: bool,
}

impl Default for ScratchRect {
    fn default() -> Self {
        Self { rect: Rect::ZERO, in_use: false }
    }
}

impl Poolable for ScratchRect {
    fn reset(&mut self) {
        self.rect = Rect::ZERO;
    }
    fn in_use(&self) -> bool {
        self.in_use
    }
    fn set_in_use(&mut self, in_use: bool) {
        self.in_use = in_use;
    }
}

/// Pooled scratch affine transform.
#[derive(Debug, Clone, Copy)]
pub struct ScratchTransform {
    pub affine: Affine,
    in_use: bool,
}

impl Default for ScratchTransform {
    fn default() -> Self {
        Self { affine: Affine::IDENTITY, in_use: false }
    }
}

impl Poolable for ScratchTransform {
    fn reset(&mut self) {
        self.affine = Affine::IDENTITY;
    }
    fn in_use(&self) -> bool {
        self.in_use
    }
    fn set_in_use(&mut self, in_use: bool) {
        self.in_use = in_use;
    }
}

/// A bounded free-list of reusable objects.
///
/// The pool grows organically: an empty free list synthesizes a new object on
/// `acquire`, and `release` retains objects only while the free list is below
/// `max_size`. Misuse (releasing a handle the pool never lent out) is logged
/// and ignored, never a panic -- a crash mid-frame would blank the canvas.
pub struct ObjectPool<T: Poolable> {
    free: RefCell<Vec<PoolHandle<T>>>,
    active: RefCell<Vec<PoolHandle<T>>>,
    max_size: usize,
    total_created: Cell<usize>,
    make: Box<dyn Fn() -> T>,
    reset_hook: Option<Box<dyn Fn(&mut T)>>,
}

impl<T: Poolable + Default + 'static> ObjectPool<T> {
    /// Create a pool that constructs objects with `T::default()`.
    pub fn new(max_size: usize) -> Self {
        Self::with_factory(max_size, T::default)
    }
}

impl<T: Poolable> ObjectPool<T> {
    /// Create a pool with a custom constructor.
    pub fn with_factory(max_size: usize, make: impl Fn() -> T + 'static) -> Self {
        Self {
            free: RefCell::new(Vec::new()),
            active: RefCell::new(Vec::new()),
            max_size,
            total_created: Cell::new(0),
            make: Box::new(make),
            reset_hook: None,
        }
    }

    /// Install an extra reset step applied on every release after the
    /// built-in [`Poolable::reset`].
    pub fn set_reset_hook(&mut self, hook: impl Fn(&mut T) + 'static) {
        self.reset_hook = Some(Box::new(hook));
    }

    /// Borrow an object, reusing a free one when available.
    pub fn acquire(&self) -> PoolHandle<T> {
        let handle = self.free.borrow_mut().pop().unwrap_or_else(|| {
            self.total_created.set(self.total_created.get() + 1);
            Rc::new(RefCell::new((self.make)()))
        });
        handle.borrow_mut().set_in_use(true);
        self.active.borrow_mut().push(Rc::clone(&handle));
        handle
    }

    /// Return a borrowed object to the pool.
    ///
    /// The object is reset before it re-enters the free list. Handles the
    /// pool does not track are ignored with a warning.
    pub fn release(&self, handle: &PoolHandle<T>) {
        let position = {
            let active = self.active.borrow();
            active.iter().position(|h| Rc::ptr_eq(h, handle))
        };
        let Some(index) = position else {
            warn!("release of an object this pool does not own; ignoring");
            return;
        };
        self.active.borrow_mut().swap_remove(index);
        {
            let mut object = handle.borrow_mut();
            object.reset();
            if let Some(hook) = &self.reset_hook {
                hook(&mut object);
            }
            object.set_in_use(false);
        }
        let mut free = self.free.borrow_mut();
        if free.len() < self.max_size {
            free.push(Rc::clone(handle));
        }
    }

    /// Forcibly reclaim every borrowed object. Used at generation
    /// boundaries such as the end of a frame.
    pub fn release_all(&self) {
        let active: Vec<_> = self.active.borrow_mut().drain(..).collect();
        let mut free = self.free.borrow_mut();
        for handle in active {
            {
                let mut object = handle.borrow_mut();
                object.reset();
                if let Some(hook) = &self.reset_hook {
                    hook(&mut object);
                }
                object.set_in_use(false);
            }
            if free.len() < self.max_size {
                free.push(handle);
            }
        }
    }

    /// Drop all bookkeeping without resetting objects. Hard teardown only.
    pub fn clear(&self) {
        self.free.borrow_mut().clear();
        self.active.borrow_mut().clear();
    }

    /// Number of objects waiting on the free list.
    pub fn size(&self) -> usize {
        self.free.borrow().len()
    }

    /// Number of currently borrowed objects.
    pub fn active_count(&self) -> usize {
        self.active.borrow().len()
    }

    /// Total objects ever constructed by this pool.
    pub fn total_created(&self) -> usize {
        self.total_created.get()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }
}

/// Run `f` with a pooled object, releasing it afterwards even on unwind.
pub fn with_pooled<T: Poolable, R>(
    pool: &ObjectPool<T>,
    f: impl FnOnce(&PoolHandle<T>) -> R,
) -> R {
    struct Guard<'a, T: Poolable> {
        pool: &'a ObjectPool<T>,
        handle: PoolHandle<T>,
    }
    impl<T: Poolable> Drop for Guard<'_, T> {
        fn drop(&mut self) {
            self.pool.release(&self.handle);
        }
    }
    let guard = Guard { pool, handle: pool.acquire() };
    f(&guard.handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_reuses_released_objects() {
        let pool: ObjectPool<ScratchPoint> = ObjectPool::new(10);
        let a = pool.acquire();
        pool.release(&a);
        let _b = pool.acquire();
        assert_eq!(pool.total_created(), 1);
    }

    #[test]
    fn test_release_resets_object() {
        let pool: ObjectPool<ScratchPoint> = ObjectPool::new(10);
        let handle = pool.acquire();
        handle.borrow_mut().point = Point::new(5.0, 7.0);
        pool.release(&handle);
        assert_eq!(handle.borrow().point, Point::ZERO);
        assert!(!handle.borrow().in_use());
    }

    #[test]
    fn test_max_size_discards_excess() {
        // Acquire 3, release all 3: only 2 are retained.
        let pool: ObjectPool<ScratchPoint> = ObjectPool::new(2);
        let a = pool.acquire();
        let b = pool.acquire();
        let c = pool.acquire();
        pool.release(&a);
        pool.release(&b);
        pool.release(&c);
        assert_eq!(pool.size(), 2);
        assert_eq!(pool.active_count(), 0);
    }

    #[test]
    fn test_repeated_acquire_release_never_grows_past_max() {
        let pool: ObjectPool<ScratchRect> = ObjectPool::new(4);
        for _ in 0..20 {
            let handle = pool.acquire();
            handle.borrow_mut().rect = Rect::new(0.0, 0.0, 10.0, 10.0);
            pool.release(&handle);
            assert!(pool.size() <= 4);
            assert_eq!(handle.borrow().rect, Rect::ZERO);
        }
    }

    #[test]
    fn test_foreign_release_is_a_noop() {
        let pool: ObjectPool<ScratchPoint> = ObjectPool::new(10);
        let foreign = Rc::new(RefCell::new(ScratchPoint::default()));
        pool.release(&foreign);
        assert_eq!(pool.size(), 0);
        assert_eq!(pool.active_count(), 0);
    }

    #[test]
    fn test_double_release_is_a_noop() {
        let pool: ObjectPool<ScratchPoint> = ObjectPool::new(10);
        let handle = pool.acquire();
        pool.release(&handle);
        pool.release(&handle);
        assert_eq!(pool.size(), 1);
    }

    #[test]
    fn test_release_all_reclaims_everything() {
        let pool: ObjectPool<ScratchTransform> = ObjectPool::new(10);
        let a = pool.acquire();
        let _b = pool.acquire();
        a.borrow_mut().affine = Affine::scale(3.0);
        pool.release_all();
        assert_eq!(pool.active_count(), 0);
        assert_eq!(pool.size(), 2);
        assert_eq!(a.borrow().affine, Affine::IDENTITY);
    }

    #[test]
    fn test_clear_drops_bookkeeping() {
        let pool: ObjectPool<ScratchPoint> = ObjectPool::new(10);
        let _a = pool.acquire();
        pool.clear();
        assert_eq!(pool.size(), 0);
        assert_eq!(pool.active_count(), 0);
    }

    #[test]
    fn test_with_pooled_releases_on_return() {
        let pool: ObjectPool<ScratchPoint> = ObjectPool::new(10);
        let sum = with_pooled(&pool, |handle| {
            let mut object = handle.borrow_mut();
            object.point = Point::new(2.0, 3.0);
            object.point.x + object.point.y
        });
        assert_eq!(sum, 5.0);
        assert_eq!(pool.active_count(), 0);
        assert_eq!(pool.size(), 1);
    }

    #[test]
    fn test_with_pooled_releases_on_panic() {
        let pool = Rc::new(ObjectPool::<ScratchPoint>::new(10));
        let inner = Rc::clone(&pool);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            with_pooled(&inner, |_| panic!("boom"));
        }));
        assert!(result.is_err());
        assert_eq!(pool.active_count(), 0);
        assert_eq!(pool.size(), 1);
    }

    #[test]
    fn test_reset_hook_runs_on_release() {
        let mut pool: ObjectPool<ScratchRect> = ObjectPool::new(10);
        pool.set_reset_hook(|object| {
            object.rect = Rect::new(0.0, 0.0, 1.0, 1.0);
        });
        let handle = pool.acquire();
        pool.release(&handle);
        assert_eq!(handle.borrow().rect, Rect::new(0.0, 0.0, 1.0, 1.0));
    }
}
