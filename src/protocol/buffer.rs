//! 编码缓冲池
//!
//! `acquire` 返回的 [`PooledBuffer`] 在 drop 时归还，任何退出路径（包括错误返回和 panic 展开）
//! 都只释放一次。

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::BytesMut;

const DEFAULT_BUFFER_CAPACITY: usize = 256;

/// 有界缓冲池
#[derive(Debug)]
pub struct BufferPool {
    free: Mutex<Vec<BytesMut>>,
    max_pooled: usize,
    outstanding: AtomicUsize,
}

impl BufferPool {
    pub fn new(max_pooled: usize) -> Arc<Self> {
        Arc::new(Self {
            free: Mutex::new(Vec::with_capacity(max_pooled)),
            max_pooled,
            outstanding: AtomicUsize::new(0),
        })
    }

    /// 借出一个空缓冲
    pub fn acquire(self: &Arc<Self>) -> PooledBuffer {
        let buf = self
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(DEFAULT_BUFFER_CAPACITY));
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        PooledBuffer {
            buf,
            pool: Arc::clone(self),
        }
    }

    /// 当前借出未归还的缓冲数
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// 池中空闲缓冲数
    pub fn idle(&self) -> usize {
        self.free.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn release(&self, mut buf: BytesMut) {
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
        buf.clear();
        let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
        if free.len() < self.max_pooled {
            free.push(buf);
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            max_pooled: 64,
            outstanding: AtomicUsize::new(0),
        }
    }
}

/// 借出的缓冲，drop 时归还缓冲池
#[derive(Debug)]
pub struct PooledBuffer {
    buf: BytesMut,
    pool: Arc<BufferPool>,
}

impl Deref for PooledBuffer {
    type Target = BytesMut;

    fn deref(&self) -> &BytesMut {
        &self.buf
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let buf = std::mem::take(&mut self.buf);
        self.pool.release(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;

    #[test]
    fn test_acquire_release() {
        let pool = BufferPool::new(2);
        {
            let mut a = pool.acquire();
            let _b = pool.acquire();
            a.put_u32(7);
            assert_eq!(pool.outstanding(), 2);
        }
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.idle(), 2);

        let reused = pool.acquire();
        assert!(reused.is_empty());
    }

    #[test]
    fn test_pool_is_bounded() {
        let pool = BufferPool::new(1);
        let a = pool.acquire();
        let b = pool.acquire();
        drop(a);
        drop(b);
        assert_eq!(pool.idle(), 1);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_released_on_unwind() {
        let pool = BufferPool::new(4);
        let cloned = Arc::clone(&pool);
        let result = std::panic::catch_unwind(move || {
            let _buf = cloned.acquire();
            panic!("encode failed");
        });
        assert!(result.is_err());
        assert_eq!(pool.outstanding(), 0);
    }
}
