// Vulkan Instance - loader, instance and validation messenger
//
// Responsibilities:
// - Load the Vulkan library
// - Check requested layers and extensions before asking for them
// - Instance creation with validation layers
// - Debug messenger that forwards validation output to `log`

use anyhow::{Context, Result};
use ash::{vk, Entry};
use raw_window_handle::RawDisplayHandle;
use std::ffi::{c_char, CStr, CString};

use crate::config::AppConfig;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Vulkan instance wrapper with automatic cleanup
pub struct VulkanInstance {
    // Debug utils (if validation enabled)
    debug_utils: Option<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,
    pub instance: ash::Instance,
    pub entry: Entry,
}

impl VulkanInstance {
    /// Create the Vulkan instance
    ///
    /// # Arguments
    /// * `display_handle` - Display the surface extensions are chosen for
    /// * `app` - Application and engine names reported to the driver
    /// * `enable_validation` - Enable Vulkan validation layers (debug only)
    pub fn new(
        display_handle: RawDisplayHandle,
        app: &AppConfig,
        enable_validation: bool,
    ) -> Result<Self> {
        log::info!("Creating Vulkan instance: {}", app.application_name);

        // Step 1: Load Vulkan library
        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        // Step 2: Create instance
        let instance = Self::create_instance(&entry, display_handle, app, enable_validation)?;

        // Step 3: Setup debug messenger if validation enabled
        let debug_utils = if enable_validation {
            match Self::setup_debug_messenger(&entry, &instance) {
                Ok(debug_utils) => Some(debug_utils),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        Ok(Self {
            debug_utils,
            instance,
            entry,
        })
    }

    fn create_instance(
        entry: &Entry,
        display_handle: RawDisplayHandle,
        app: &AppConfig,
        enable_validation: bool,
    ) -> Result<ash::Instance> {
        let app_name = CString::new(app.application_name.as_str())?;
        let engine_name = CString::new(app.engine_name.as_str())?;

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_3);

        // Validation layers
        let layer_names: Vec<&CStr> = if enable_validation {
            vec![VALIDATION_LAYER]
        } else {
            vec![]
        };

        let available_layers = entry
            .enumerate_instance_layer_properties()
            .context("Failed to enumerate instance layers")?;
        let missing = missing_names(
            &layer_names,
            available_layers
                .iter()
                .map(|p| unsafe { CStr::from_ptr(p.layer_name.as_ptr()) }),
        );
        if !missing.is_empty() {
            anyhow::bail!("Required layers not supported: {}", join_names(&missing));
        }

        // Required extensions: whatever the windowing system needs for a
        // surface, plus debug utils for the messenger
        let mut extensions: Vec<&CStr> = ash_window::enumerate_required_extensions(display_handle)
            .context("Failed to query surface extensions for this display")?
            .iter()
            .map(|&ptr| unsafe { CStr::from_ptr(ptr) })
            .collect();
        if enable_validation {
            extensions.push(ash::extensions::ext::DebugUtils::name());
        }

        let available_extensions = entry
            .enumerate_instance_extension_properties(None)
            .context("Failed to enumerate instance extensions")?;
        let missing = missing_names(
            &extensions,
            available_extensions
                .iter()
                .map(|p| unsafe { CStr::from_ptr(p.extension_name.as_ptr()) }),
        );
        if !missing.is_empty() {
            anyhow::bail!(
                "Required instance extensions not supported: {}",
                join_names(&missing)
            );
        }

        for ext in &extensions {
            log::debug!("Instance extension: {}", ext.to_string_lossy());
        }

        let layer_ptrs: Vec<*const c_char> = layer_names.iter().map(|n| n.as_ptr()).collect();
        let extension_ptrs: Vec<*const c_char> = extensions.iter().map(|n| n.as_ptr()).collect();

        // Chained so instance creation and destruction are covered too
        let mut debug_info = debug_messenger_create_info();

        let mut create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layer_ptrs);
        if enable_validation {
            create_info = create_info.push_next(&mut debug_info);
        }

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")?;

        Ok(instance)
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ash::extensions::ext::DebugUtils::new(entry, instance);

        let create_info = debug_messenger_create_info();

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .context("Failed to set up debug messenger")?;

        Ok((debug_utils, messenger))
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan instance...");

        unsafe {
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

fn debug_messenger_create_info() -> vk::DebugUtilsMessengerCreateInfoEXT {
    vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback))
        .build()
}

/// Names from `required` that do not appear in `available`, in order.
pub fn missing_names<'a, 'b>(
    required: &[&'a CStr],
    available: impl IntoIterator<Item = &'b CStr>,
) -> Vec<&'a CStr> {
    let available: Vec<&CStr> = available.into_iter().collect();
    required
        .iter()
        .copied()
        .filter(|name| !available.iter().any(|a| *a == *name))
        .collect()
}

pub fn join_names(names: &[&CStr]) -> String {
    names
        .iter()
        .map(|n| n.to_string_lossy())
        .collect::<Vec<_>>()
        .join(", ")
}

fn severity_level(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> log::Level {
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::Level::Error
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::Level::Warn
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        log::Level::Info
    } else {
        log::Level::Debug
    }
}

fn validation_line(message: &CStr) -> String {
    format!("VAL: {}", message.to_string_lossy())
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*p_callback_data).p_message);

    log::log!(
        target: "vulkan",
        severity_level(message_severity),
        "{}",
        validation_line(message)
    );

    vk::FALSE
}
