// Backend module - Vulkan initialization layer
//
// Design: Thin wrapper around ash, one type per Vulkan object that needs
// destroying, each cleaned up by Drop

pub mod device;
pub mod instance;
pub mod surface;
pub mod swapchain;

pub use device::VulkanDevice;
pub use instance::VulkanInstance;
pub use surface::{Surface, SurfaceSupport};
pub use swapchain::Swapchain;

use anyhow::Result;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::sync::Arc;
use winit::window::Window;

use crate::config::Config;

/// Every Vulkan object the application creates.
///
/// IMPORTANT: Field order matters for Drop! Fields drop top to bottom, so
/// the swapchain goes before the device and the surface. The instance is
/// released last through the Arcs the device and surface hold.
pub struct Vulkan {
    _swapchain: Swapchain,
    device: Arc<VulkanDevice>,
    _surface: Surface,
}

impl Vulkan {
    /// Run the whole initialization sequence for `window`.
    ///
    /// The window must outlive the returned value.
    pub fn new(window: &Window, config: &Config, enable_validation: bool) -> Result<Self> {
        log::info!("Initializing Vulkan...");

        let display_handle = window.raw_display_handle();
        let window_handle = window.raw_window_handle();

        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Instance + debug messenger
        // ─────────────────────────────────────────────────────────────────────
        let instance = Arc::new(VulkanInstance::new(
            display_handle,
            &config.app,
            enable_validation,
        )?);

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Surface (platform-specific window connection)
        // ─────────────────────────────────────────────────────────────────────
        let surface = Surface::new(instance.clone(), display_handle, window_handle)?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3: Physical + logical device
        // ─────────────────────────────────────────────────────────────────────
        let device = VulkanDevice::new(instance, &surface)?;
        log::debug!(
            "Queues: graphics={:?}, present={:?}",
            device.graphics_queue,
            device.present_queue
        );

        // ─────────────────────────────────────────────────────────────────────
        // STEP 4: Swapchain
        // ─────────────────────────────────────────────────────────────────────
        let support = surface.query_support(device.physical_device)?;
        if !support.is_adequate() {
            anyhow::bail!("Surface reports no formats or present modes");
        }

        let size = window.inner_size();
        let swapchain = Swapchain::new(
            device.clone(),
            &surface,
            &support,
            (size.width, size.height),
            config.present_mode(),
        )?;

        log::info!(
            "Swapchain ready: {}x{} {:?} {:?} ({} views)",
            swapchain.extent.width,
            swapchain.extent.height,
            swapchain.format.format,
            swapchain.present_mode,
            swapchain.image_views.len()
        );
        log::info!("Vulkan initialized successfully!");

        Ok(Self {
            _swapchain: swapchain,
            device,
            _surface: surface,
        })
    }

    /// Wait for the GPU before tearing anything down
    pub fn wait_idle(&self) -> Result<()> {
        self.device.wait_idle()
    }
}
