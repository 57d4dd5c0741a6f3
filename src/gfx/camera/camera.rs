// src/gfx/camera/camera.rs
//! Camera state and per-camera render targets
//!
//! A camera owns every texture the pass sequence renders into at its
//! size: the G-buffer, depth, radiance and color targets plus the
//! triple-buffered output chain. Projection matrices are cached and only
//! recomputed after a parameter changed. Resizing is deferred until the
//! start of the next frame so one frame never mixes target sizes.

use cgmath::{Deg, Matrix4, SquareMatrix};

use crate::error::{GfxError, GfxResult};
use crate::gfx::context::RenderContext;
use crate::gfx::rendering::gbuffer::GBuffer;
use crate::gfx::resources::{
    FrameChain, FrontBufferHandle, PixelFormat, Texture, TextureDesc, TextureUsage,
};
use crate::gfx::scene::Transform;

#[rustfmt::skip]
pub const OPENGL_TO_WGPU_MATRIX: cgmath::Matrix4<f32> = cgmath::Matrix4::new(
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 0.5, 0.5,
    0.0, 0.0, 0.0, 1.0,
);

fn perspective_matrix(fovy_deg: f32, aspect: f32, near: f32, far: f32) -> Matrix4<f32> {
    OPENGL_TO_WGPU_MATRIX * cgmath::perspective(Deg(fovy_deg), aspect, near, far)
}

pub struct Camera {
    pub transform: Transform,
    pub enabled: bool,

    fovy_deg: f32,
    aspect: f32,
    near: f32,
    far: f32,
    proj: Matrix4<f32>,
    inv_proj: Matrix4<f32>,
    proj_dirty: bool,

    width: u32,
    height: u32,
    pending_size: Option<(u32, u32)>,

    gbuffer: GBuffer,
    depth: Texture,
    radiance: Texture,
    color: Texture,
    chain: FrameChain,

    resize_callbacks: Vec<Box<dyn FnMut(u32, u32) + Send>>,
    disposed: bool,
}

impl Camera {
    pub fn create(ctx: &RenderContext, width: u32, height: u32) -> GfxResult<Self> {
        if width == 0 || height == 0 {
            return Err(GfxError::OutOfRange {
                what: "camera target size",
            });
        }

        let (gbuffer, depth, radiance, color) = Self::allocate_targets(ctx, width, height)?;
        let chain = FrameChain::new(ctx, width, height)?;

        let fovy_deg = 45.0;
        let aspect = width as f32 / height as f32;
        let near = 0.1;
        let far = 1000.0;
        let proj = perspective_matrix(fovy_deg, aspect, near, far);

        Ok(Self {
            transform: Transform::default(),
            enabled: true,
            fovy_deg,
            aspect,
            near,
            far,
            proj,
            inv_proj: proj.invert().unwrap_or_else(Matrix4::identity),
            proj_dirty: false,
            width,
            height,
            pending_size: None,
            gbuffer,
            depth,
            radiance,
            color,
            chain,
            resize_callbacks: Vec::new(),
            disposed: false,
        })
    }

    fn allocate_targets(
        ctx: &RenderContext,
        width: u32,
        height: u32,
    ) -> GfxResult<(GBuffer, Texture, Texture, Texture)> {
        let gbuffer = GBuffer::create(ctx, width, height)?;
        let depth = Texture::create(
            ctx,
            &TextureDesc::new(
                width,
                height,
                PixelFormat::R32Typeless,
                TextureUsage::DEPTH_STENCIL.and_shader_resource(),
            )
            .with_label("camera depth"),
        )?;
        let radiance = Texture::create(
            ctx,
            &TextureDesc::new(
                width,
                height,
                PixelFormat::Rgba32Float,
                TextureUsage::RENDER_TARGET.and_shader_resource(),
            )
            .with_label("camera radiance"),
        )?;
        // HDR so bloom and the gamma pass see the un-mapped range
        let color = Texture::create(
            ctx,
            &TextureDesc::new(
                width,
                height,
                PixelFormat::Rgba32Float,
                TextureUsage::RENDER_TARGET.and_shader_resource(),
            )
            .with_label("camera color"),
        )?;
        Ok((gbuffer, depth, radiance, color))
    }

    // ------------------------------------------------------------------
    // Projection

    pub fn fovy(&self) -> f32 {
        self.fovy_deg
    }

    pub fn set_fovy(&mut self, degrees: f32) {
        self.fovy_deg = degrees;
        self.proj_dirty = true;
    }

    pub fn aspect(&self) -> f32 {
        self.aspect
    }

    pub fn set_aspect(&mut self, aspect: f32) {
        self.aspect = aspect;
        self.proj_dirty = true;
    }

    pub fn near(&self) -> f32 {
        self.near
    }

    pub fn set_near(&mut self, near: f32) {
        self.near = near;
        self.proj_dirty = true;
    }

    pub fn far(&self) -> f32 {
        self.far
    }

    pub fn set_far(&mut self, far: f32) {
        self.far = far;
        self.proj_dirty = true;
    }

    fn refresh_projection(&mut self) {
        if !self.proj_dirty {
            return;
        }
        self.proj = perspective_matrix(self.fovy_deg, self.aspect, self.near, self.far);
        self.inv_proj = self.proj.invert().unwrap_or_else(Matrix4::identity);
        self.proj_dirty = false;
    }

    /// Projection matrix, recomputed here if a parameter changed since
    /// the last read.
    pub fn proj(&mut self) -> Matrix4<f32> {
        self.refresh_projection();
        self.proj
    }

    pub fn inv_proj(&mut self) -> Matrix4<f32> {
        self.refresh_projection();
        self.inv_proj
    }

    /// View matrix, the inverse of the camera's world transform.
    pub fn view(&self) -> Matrix4<f32> {
        self.transform.inverse_model()
    }

    pub fn view_proj(&mut self) -> Matrix4<f32> {
        self.proj() * self.view()
    }

    // ------------------------------------------------------------------
    // Resize

    /// Records the new target size. Nothing is reallocated until
    /// [`Camera::pre_render_update`] runs at the start of the next frame.
    pub fn resize(&mut self, width: u32, height: u32) -> GfxResult<()> {
        if width == 0 || height == 0 {
            return Err(GfxError::OutOfRange {
                what: "camera target size",
            });
        }
        self.pending_size = Some((width, height));
        Ok(())
    }

    pub fn needs_resize(&self) -> bool {
        self.pending_size.is_some()
    }

    /// Runs once per frame before any drawing. Applies a pending resize:
    /// disposes the old targets, allocates new ones, updates the aspect
    /// ratio and notifies resize callbacks. Returns whether a resize
    /// fired so the caller can re-bind camera-sized resources.
    pub fn pre_render_update(&mut self, ctx: &RenderContext) -> GfxResult<bool> {
        let Some((width, height)) = self.pending_size.take() else {
            return Ok(false);
        };

        self.gbuffer.dispose();
        self.depth.dispose();
        self.radiance.dispose();
        self.color.dispose();

        let (gbuffer, depth, radiance, color) = Self::allocate_targets(ctx, width, height)?;
        self.gbuffer = gbuffer;
        self.depth = depth;
        self.radiance = radiance;
        self.color = color;
        self.chain.recreate(ctx, width, height)?;

        self.width = width;
        self.height = height;
        self.set_aspect(width as f32 / height as f32);

        for callback in &mut self.resize_callbacks {
            callback(width, height);
        }
        log::info!("camera targets resized to {}x{}", width, height);
        Ok(true)
    }

    /// Registers a callback invoked after a deferred resize was applied.
    pub fn add_resize_callback(&mut self, callback: impl FnMut(u32, u32) + Send + 'static) {
        self.resize_callbacks.push(Box::new(callback));
    }

    // ------------------------------------------------------------------
    // Targets

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn gbuffer(&self) -> &GBuffer {
        &self.gbuffer
    }

    pub fn depth(&self) -> &Texture {
        &self.depth
    }

    pub fn radiance(&self) -> &Texture {
        &self.radiance
    }

    pub fn color(&self) -> &Texture {
        &self.color
    }

    pub fn frame_chain(&self) -> &FrameChain {
        &self.chain
    }

    /// Publishes the finished back buffer to the consumer side.
    pub fn swap_frame_buffers(&self) {
        self.chain.swap_back_middle();
    }

    /// Cloneable cross-thread handle for fetching completed frames.
    pub fn front_buffer_handle(&self) -> FrontBufferHandle {
        self.chain.handle()
    }

    /// Releases every camera-owned GPU target. Idempotent.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.gbuffer.dispose();
        self.depth.dispose();
        self.radiance.dispose();
        self.color.dispose();
        self.chain.dispose();
        self.disposed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::test_support::test_context;

    fn mat_approx_eq(a: Matrix4<f32>, b: Matrix4<f32>, eps: f32) -> bool {
        (0..4).all(|c| (0..4).all(|r| (a[c][r] - b[c][r]).abs() < eps))
    }

    #[test]
    fn test_projection_recomputes_after_setter() {
        let Some(ctx) = test_context() else { return };
        let mut camera = Camera::create(&ctx, 64, 64).expect("create camera");

        let before = camera.proj();
        camera.set_fovy(90.0);
        let after = camera.proj();
        assert!(!mat_approx_eq(before, after, 1e-6));

        // Inverse stays consistent with the recomputed projection
        let identity = camera.proj() * camera.inv_proj();
        assert!(mat_approx_eq(identity, Matrix4::identity(), 1e-4));
    }

    #[test]
    fn test_resize_is_deferred() {
        let Some(ctx) = test_context() else { return };
        let mut camera = Camera::create(&ctx, 64, 64).expect("create camera");

        camera.resize(128, 96).expect("resize");
        assert!(camera.needs_resize());
        assert_eq!(camera.width(), 64);
        assert_eq!(camera.gbuffer().width(), 64);

        let resized = camera.pre_render_update(&ctx).expect("pre-render update");
        assert!(resized);
        assert_eq!(camera.width(), 128);
        assert_eq!(camera.height(), 96);
        assert_eq!(camera.gbuffer().width(), 128);
        assert_eq!(camera.depth().width(), 128);
        assert_eq!(camera.frame_chain().size(), (128, 96));

        // Second update with nothing pending is a no-op
        assert!(!camera.pre_render_update(&ctx).expect("no-op update"));
    }

    #[test]
    fn test_zero_dimension_rejected() {
        let Some(ctx) = test_context() else { return };
        assert!(Camera::create(&ctx, 0, 64).is_err());

        let mut camera = Camera::create(&ctx, 64, 64).expect("create camera");
        assert!(camera.resize(64, 0).is_err());
        assert!(!camera.needs_resize());
    }

    #[test]
    fn test_resize_callback_fires_with_new_size() {
        let Some(ctx) = test_context() else { return };
        let mut camera = Camera::create(&ctx, 32, 32).expect("create camera");

        let seen = std::sync::Arc::new(std::sync::Mutex::new(None));
        let sink = seen.clone();
        camera.add_resize_callback(move |w, h| {
            *sink.lock().unwrap() = Some((w, h));
        });

        camera.resize(48, 24).expect("resize");
        camera.pre_render_update(&ctx).expect("pre-render update");
        assert_eq!(*seen.lock().unwrap(), Some((48, 24)));
    }
}
