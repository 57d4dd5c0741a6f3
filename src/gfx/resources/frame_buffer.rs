// src/gfx/resources/frame_buffer.rs
//! Triple-buffered frame output
//!
//! Each camera owns three frame buffers rotated through front/middle/back
//! roles. The renderer finishes a frame into the back buffer and publishes
//! it by swapping back/middle; a consumer on another thread acquires the
//! newest completed frame by swapping middle/front. Both swaps exchange
//! role indices under one mutex, so the consumer never receives the buffer
//! the renderer is writing into.

use std::sync::{Arc, Mutex};

use crate::error::{GfxError, GfxResult};
use crate::gfx::context::RenderContext;

use super::format::{PixelFormat, TextureUsage};
use super::texture::{Texture, TextureDesc, ViewKind};

/// One renderable output target with a stable identity index.
pub struct FrameBuffer {
    texture: Texture,
    width: u32,
    height: u32,
    index: usize,
}

impl FrameBuffer {
    pub fn create(ctx: &RenderContext, width: u32, height: u32, index: usize) -> GfxResult<Self> {
        let label = format!("frame buffer {}", index);
        let texture = Texture::create(
            ctx,
            &TextureDesc::new(
                width,
                height,
                PixelFormat::Bgra8Unorm,
                TextureUsage::RENDER_TARGET.and_shader_resource(),
            )
            .with_label(&label),
        )?;

        Ok(Self {
            texture,
            width,
            height,
            index,
        })
    }

    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

/// Front/middle/back role assignment. Pure index bookkeeping; the chain
/// wraps it in the lock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct TripleIndex {
    front: usize,
    middle: usize,
    back: usize,
}

impl TripleIndex {
    pub(crate) fn new() -> Self {
        Self {
            front: 0,
            middle: 1,
            back: 2,
        }
    }

    /// Renderer side: the just-finished back buffer becomes the published
    /// middle buffer.
    pub(crate) fn swap_back_middle(&mut self) {
        std::mem::swap(&mut self.back, &mut self.middle);
    }

    /// Consumer side: the published middle buffer becomes the new front.
    /// Returns the new front index.
    pub(crate) fn swap_middle_front(&mut self) -> usize {
        std::mem::swap(&mut self.middle, &mut self.front);
        self.front
    }

    pub(crate) fn front(&self) -> usize {
        self.front
    }

    pub(crate) fn back(&self) -> usize {
        self.back
    }
}

struct ChainState {
    buffers: Vec<FrameBuffer>,
    idx: TripleIndex,
    width: u32,
    height: u32,
    disposed: bool,
}

/// The camera-owned side of the triple buffer.
pub struct FrameChain {
    shared: Arc<Mutex<ChainState>>,
}

fn lock_state(shared: &Arc<Mutex<ChainState>>) -> std::sync::MutexGuard<'_, ChainState> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl FrameChain {
    pub fn new(ctx: &RenderContext, width: u32, height: u32) -> GfxResult<Self> {
        let buffers = Self::make_buffers(ctx, width, height)?;
        Ok(Self {
            shared: Arc::new(Mutex::new(ChainState {
                buffers,
                idx: TripleIndex::new(),
                width,
                height,
                disposed: false,
            })),
        })
    }

    fn make_buffers(ctx: &RenderContext, width: u32, height: u32) -> GfxResult<Vec<FrameBuffer>> {
        (0..3)
            .map(|i| FrameBuffer::create(ctx, width, height, i))
            .collect()
    }

    /// Render-target view of the buffer the renderer may draw into.
    pub fn back_view(&self) -> GfxResult<wgpu::TextureView> {
        let state = lock_state(&self.shared);
        if state.disposed {
            return Err(GfxError::Disposed { what: "frame chain" });
        }
        let back = state.idx.back();
        Ok(state.buffers[back].texture.view(ViewKind::RenderTarget)?.clone())
    }

    /// Publishes the finished back buffer.
    pub fn swap_back_middle(&self) {
        let mut state = lock_state(&self.shared);
        state.idx.swap_back_middle();
    }

    /// Drops the old buffers and allocates three new ones at the given
    /// size. Role assignment carries over.
    pub fn recreate(&self, ctx: &RenderContext, width: u32, height: u32) -> GfxResult<()> {
        let buffers = Self::make_buffers(ctx, width, height)?;
        let mut state = lock_state(&self.shared);
        for old in &mut state.buffers {
            old.texture.dispose();
        }
        state.buffers = buffers;
        state.width = width;
        state.height = height;
        Ok(())
    }

    pub fn size(&self) -> (u32, u32) {
        let state = lock_state(&self.shared);
        (state.width, state.height)
    }

    pub fn dispose(&self) {
        let mut state = lock_state(&self.shared);
        for buffer in &mut state.buffers {
            buffer.texture.dispose();
        }
        state.disposed = true;
    }

    pub fn handle(&self) -> FrontBufferHandle {
        FrontBufferHandle {
            shared: self.shared.clone(),
        }
    }
}

/// A completed frame as seen by the consumer.
pub struct FrontBuffer {
    pub view: wgpu::TextureView,
    pub width: u32,
    pub height: u32,
    pub index: usize,
}

/// Cross-thread handle for fetching completed frames.
#[derive(Clone)]
pub struct FrontBufferHandle {
    shared: Arc<Mutex<ChainState>>,
}

impl FrontBufferHandle {
    /// Rotates the newest published frame into the front slot and returns
    /// it. The returned buffer stays stable until the next call.
    pub fn acquire_front(&self) -> GfxResult<FrontBuffer> {
        let mut state = lock_state(&self.shared);
        if state.disposed {
            return Err(GfxError::Disposed { what: "frame chain" });
        }
        let front = state.idx.swap_middle_front();
        let buffer = &state.buffers[front];
        Ok(FrontBuffer {
            view: buffer.texture.view(ViewKind::ShaderResource)?.clone(),
            width: buffer.width,
            height: buffer.height,
            index: buffer.index,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roles(idx: &TripleIndex) -> [usize; 3] {
        let mut r = [idx.front, idx.middle, idx.back];
        r.sort();
        r
    }

    #[test]
    fn test_roles_stay_a_permutation() {
        let mut idx = TripleIndex::new();
        // Renderer and consumer interleaving in every ratio
        for step in 0..64 {
            if step % 3 == 0 {
                idx.swap_middle_front();
            } else {
                idx.swap_back_middle();
            }
            assert_eq!(roles(&idx), [0, 1, 2]);
            assert_ne!(idx.front(), idx.back());
        }
    }

    #[test]
    fn test_consumer_gets_latest_published() {
        let mut idx = TripleIndex::new();

        // Finish a frame in the back buffer, publish it
        let finished = idx.back();
        idx.swap_back_middle();

        // Consumer must receive exactly that buffer
        assert_eq!(idx.swap_middle_front(), finished);
    }

    #[test]
    fn test_acquire_never_returns_back_buffer() {
        let mut idx = TripleIndex::new();
        for step in 0..32 {
            idx.swap_back_middle();
            let front = idx.swap_middle_front();
            assert_ne!(front, idx.back());
            if step % 2 == 0 {
                // Consumer polling twice between publishes must also hold
                let front = idx.swap_middle_front();
                assert_ne!(front, idx.back());
            }
        }
    }
}
