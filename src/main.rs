// =============================================================================
// VULKAN BOOTSTRAP - window, instance, device and swapchain setup
// =============================================================================
//
// INITIALIZATION ORDER:
// 1. Window (800x600, "Vulkan", fixed size)
// 2. Instance + validation debug messenger
// 3. Window surface
// 4. Physical device (first GPU meeting the requirements)
// 5. Logical device + graphics/present queues
// 6. Swapchain + image views
//
// Nothing is rendered. Any failure ends the process with the error on
// stderr and exit status 1.
//
// =============================================================================

mod backend;
mod config;

use anyhow::{Context, Result};
use backend::Vulkan;
use config::Config;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Load configuration from config.toml
    let (config, config_error) = Config::load();

    // Initialize logging
    init_logging(&config);
    if let Some(e) = config_error {
        log::warn!("Failed to load {}: {:#}. Using defaults.", config::CONFIG_PATH, e);
    }
    log::info!("Starting Vulkan bootstrap");
    log::info!(
        "Window: {}x{} \"{}\"",
        config.window.width,
        config.window.height,
        config.window.title
    );

    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    // Nothing animates, so only wake up for window events
    event_loop.set_control_flow(ControlFlow::Wait);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    app.finish()
}

/// Initialize logging; `RUST_LOG` overrides the configured level
fn init_logging(config: &Config) {
    use env_logger::{Builder, Env};

    let mut builder =
        Builder::from_env(Env::default().default_filter_or(config.log_level().to_string()));
    builder.format_timestamp_millis();
    builder.init();
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Main application struct holding the window and all Vulkan objects.
///
/// IMPORTANT: Field order matters for Drop! Vulkan objects are destroyed
/// before the window they present to, even when `finish` never runs.
pub struct App {
    config: Config,
    vulkan: Option<Vulkan>,
    window: Option<Window>,
    /// First fatal error; returned from main once the event loop exits
    error: Option<anyhow::Error>,
}

impl App {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            vulkan: None,
            window: None,
            error: None,
        }
    }

    // =========================================================================
    // INITIALIZATION
    // =========================================================================

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Create window with settings from config
        // ─────────────────────────────────────────────────────────────────────
        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ))
            .with_resizable(self.config.window.resizable);

        let window = event_loop
            .create_window(window_attributes)
            .context("Failed to create window")?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Everything Vulkan
        // ─────────────────────────────────────────────────────────────────────
        // Enable validation layers based on config (and debug build)
        let enable_validation = cfg!(debug_assertions) && self.config.debug.validation_layers;
        let vulkan = Vulkan::new(&window, &self.config, enable_validation)?;

        self.vulkan = Some(vulkan);
        self.window = Some(window);
        Ok(())
    }

    /// Record a fatal error and stop the event loop
    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("{:#}", error);
        if self.error.is_none() {
            self.error = Some(error);
        }
        event_loop.exit();
    }

    /// Tear down in order and report the outcome of the run
    fn finish(mut self) -> Result<()> {
        self.cleanup();
        match self.error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // =========================================================================
    // CLEANUP
    // =========================================================================

    fn cleanup(&mut self) {
        if let Some(vulkan) = self.vulkan.take() {
            log::info!("Cleaning up Vulkan resources...");
            if let Err(e) = vulkan.wait_idle() {
                log::warn!("wait_idle failed during cleanup: {:#}", e);
            }
            drop(vulkan);
        }

        // Window goes last
        self.window = None;
        log::info!("Cleanup complete");
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    /// Called when the application is ready to create windows.
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() || self.error.is_some() {
            return;
        }

        if let Err(e) = self.init(event_loop) {
            self.fail(event_loop, e.context("Failed to initialize Vulkan"));
            return;
        }

        if !self.config.app.run_main_loop {
            log::info!("Main loop disabled, exiting after initialization");
            event_loop.exit();
        }
    }

    /// Handle window events.
    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            // ─────────────────────────────────────────────────────────────────
            // CLOSE REQUEST
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                event_loop.exit();
            }

            // ─────────────────────────────────────────────────────────────────
            // KEYBOARD INPUT
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed()
                    && event.physical_key == PhysicalKey::Code(KeyCode::Escape)
                {
                    log::info!("ESC pressed, exiting...");
                    event_loop.exit();
                }
            }

            _ => {}
        }
    }
}
