// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Physical device selection (first GPU meeting the requirements)
// - Queue family lookup for graphics and presentation
// - Logical device + queue creation

use anyhow::{Context, Result};
use ash::vk;
use std::ffi::{c_char, CStr, CString};
use std::sync::Arc;

use super::instance::missing_names;
use super::{Surface, VulkanInstance};

/// Minimum API version a GPU must report
pub const MIN_API_VERSION: u32 = vk::API_VERSION_1_3;

/// Device extensions every candidate must expose
pub const REQUIRED_DEVICE_EXTENSIONS: [&CStr; 4] = [
    c"VK_KHR_swapchain",
    c"VK_KHR_spirv_1_4",
    c"VK_KHR_synchronization2",
    c"VK_KHR_create_renderpass2",
];

/// What the selection predicate looks at for one physical device
#[derive(Debug, Clone, Default)]
pub struct DeviceCandidate {
    pub name: String,
    pub api_version: u32,
    pub queue_families: Vec<vk::QueueFlags>,
    pub extensions: Vec<CString>,
    pub dynamic_rendering: bool,
    pub extended_dynamic_state: bool,
}

impl DeviceCandidate {
    fn query(instance: &ash::Instance, device: vk::PhysicalDevice) -> Result<Self> {
        let props = unsafe { instance.get_physical_device_properties(device) };
        let name = unsafe { CStr::from_ptr(props.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        let queue_families = unsafe { instance.get_physical_device_queue_family_properties(device) }
            .iter()
            .map(|family| family.queue_flags)
            .collect();

        let extensions = unsafe { instance.enumerate_device_extension_properties(device) }
            .with_context(|| format!("Failed to enumerate extensions of {}", name))?
            .iter()
            .map(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) }.to_owned())
            .collect();

        let mut vulkan_13 = vk::PhysicalDeviceVulkan13Features::default();
        let mut dynamic_state = vk::PhysicalDeviceExtendedDynamicStateFeaturesEXT::default();
        {
            let mut features = vk::PhysicalDeviceFeatures2::builder()
                .push_next(&mut vulkan_13)
                .push_next(&mut dynamic_state);
            unsafe { instance.get_physical_device_features2(device, &mut features) };
        }

        Ok(Self {
            name,
            api_version: props.api_version,
            queue_families,
            extensions,
            dynamic_rendering: vulkan_13.dynamic_rendering == vk::TRUE,
            extended_dynamic_state: dynamic_state.extended_dynamic_state == vk::TRUE,
        })
    }

    /// Requirements this device fails; empty means suitable
    pub fn unmet_requirements(&self) -> Vec<String> {
        let mut unmet = Vec::new();

        if self.api_version < MIN_API_VERSION {
            unmet.push(format!(
                "API version {}.{} < 1.3",
                vk::api_version_major(self.api_version),
                vk::api_version_minor(self.api_version)
            ));
        }

        if !self
            .queue_families
            .iter()
            .any(|flags| flags.contains(vk::QueueFlags::GRAPHICS))
        {
            unmet.push("no graphics queue family".to_string());
        }

        let available = self.extensions.iter().map(CString::as_c_str);
        for ext in missing_names(&REQUIRED_DEVICE_EXTENSIONS, available) {
            unmet.push(format!("missing extension {}", ext.to_string_lossy()));
        }

        if !self.dynamic_rendering {
            unmet.push("no dynamicRendering".to_string());
        }
        if !self.extended_dynamic_state {
            unmet.push("no extendedDynamicState".to_string());
        }

        unmet
    }

    pub fn is_suitable(&self) -> bool {
        self.unmet_requirements().is_empty()
    }
}

/// Index of the first suitable candidate, in enumeration order
pub fn select_device(candidates: &[DeviceCandidate]) -> Option<usize> {
    candidates.iter().position(DeviceCandidate::is_suitable)
}

/// Queue families used for rendering and presentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilyIndices {
    /// Pick graphics and present families.
    ///
    /// `families[i]` holds the flags of family `i` and whether it can present
    /// to the surface. A single family doing both is preferred.
    pub fn find(families: &[(vk::QueueFlags, bool)]) -> Option<Self> {
        let is_graphics = |flags: &vk::QueueFlags| flags.contains(vk::QueueFlags::GRAPHICS);

        let graphics = families.iter().position(|(flags, _)| is_graphics(flags))?;
        if families[graphics].1 {
            return Some(Self::shared(graphics as u32));
        }

        if let Some(both) = families
            .iter()
            .position(|(flags, present)| is_graphics(flags) && *present)
        {
            return Some(Self::shared(both as u32));
        }

        let present = families.iter().position(|(_, present)| *present)?;
        Some(Self {
            graphics: graphics as u32,
            present: present as u32,
        })
    }

    fn shared(index: u32) -> Self {
        Self {
            graphics: index,
            present: index,
        }
    }

    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Distinct family indices, graphics first
    pub fn unique(&self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanDevice {
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub instance: Arc<VulkanInstance>,

    // Queue handles
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub queue_families: QueueFamilyIndices,
}

impl VulkanDevice {
    /// Pick a GPU that can present to `surface` and create the logical device
    pub fn new(instance: Arc<VulkanInstance>, surface: &Surface) -> Result<Arc<Self>> {
        // Step 1: Pick physical device (GPU)
        let physical_device = Self::pick_physical_device(&instance.instance)?;

        // Step 2: Find queue families
        let queue_families =
            Self::find_queue_families(&instance.instance, physical_device, surface)?;
        log::info!(
            "Queue families: graphics={}, present={}",
            queue_families.graphics,
            queue_families.present
        );

        // Step 3: Create logical device
        let (device, graphics_queue, present_queue) =
            Self::create_logical_device(&instance.instance, physical_device, queue_families)?;

        let properties =
            unsafe { instance.instance.get_physical_device_properties(physical_device) };

        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );

        Ok(Arc::new(Self {
            device,
            physical_device,
            instance,
            graphics_queue,
            present_queue,
            queue_families,
        }))
    }

    fn pick_physical_device(instance: &ash::Instance) -> Result<vk::PhysicalDevice> {
        let devices = unsafe { instance.enumerate_physical_devices() }
            .context("Failed to enumerate physical devices")?;

        if devices.is_empty() {
            anyhow::bail!("failed to find GPUs with Vulkan support");
        }

        let candidates = devices
            .iter()
            .map(|&device| DeviceCandidate::query(instance, device))
            .collect::<Result<Vec<_>>>()?;

        for candidate in &candidates {
            let unmet = candidate.unmet_requirements();
            if !unmet.is_empty() {
                log::debug!("Skipping {}: {}", candidate.name, unmet.join(", "));
            }
        }

        let index = select_device(&candidates)
            .ok_or_else(|| anyhow::anyhow!("Failed to find a suitable GPU."))?;

        log::info!("SELECTED DEVICE: {}", candidates[index].name);

        Ok(devices[index])
    }

    fn find_queue_families(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        surface: &Surface,
    ) -> Result<QueueFamilyIndices> {
        let families =
            unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

        let support = families
            .iter()
            .enumerate()
            .map(|(i, family)| -> Result<(vk::QueueFlags, bool)> {
                let present = surface.supports_present(physical_device, i as u32)?;
                Ok((family.queue_flags, present))
            })
            .collect::<Result<Vec<_>>>()?;

        QueueFamilyIndices::find(&support)
            .context("Could not find a queue for graphics and present")
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        queue_families: QueueFamilyIndices,
    ) -> Result<(ash::Device, vk::Queue, vk::Queue)> {
        let queue_priorities = [1.0];
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = queue_families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        let extensions: Vec<*const c_char> = REQUIRED_DEVICE_EXTENSIONS
            .iter()
            .map(|ext| ext.as_ptr())
            .collect();

        // Same features the predicate checked for
        let mut vulkan_13 = vk::PhysicalDeviceVulkan13Features {
            dynamic_rendering: vk::TRUE,
            ..Default::default()
        };
        let mut dynamic_state = vk::PhysicalDeviceExtendedDynamicStateFeaturesEXT {
            extended_dynamic_state: vk::TRUE,
            ..Default::default()
        };

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .push_next(&mut vulkan_13)
            .push_next(&mut dynamic_state);

        let device = unsafe { instance.create_device(physical_device, &create_info, None) }
            .context("Failed to create logical device")?;

        let graphics_queue = unsafe { device.get_device_queue(queue_families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(queue_families.present, 0) };

        Ok((device, graphics_queue, present_queue))
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        let _ = self.wait_idle();

        unsafe {
            self.device.destroy_device(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capable(name: &str) -> DeviceCandidate {
        DeviceCandidate {
            name: name.to_string(),
            api_version: vk::API_VERSION_1_3,
            queue_families: vec![vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE],
            extensions: REQUIRED_DEVICE_EXTENSIONS
                .iter()
                .map(|&e| e.to_owned())
                .chain(std::iter::once(c"VK_KHR_maintenance4".to_owned()))
                .collect(),
            dynamic_rendering: true,
            extended_dynamic_state: true,
        }
    }

    #[test]
    fn capable_device_is_suitable() {
        assert!(capable("gpu").is_suitable());
    }

    #[test]
    fn old_api_version_is_rejected() {
        let mut device = capable("old");
        device.api_version = vk::API_VERSION_1_2;
        assert_eq!(device.unmet_requirements(), vec!["API version 1.2 < 1.3".to_string()]);

        device.api_version = vk::make_api_version(0, 1, 3, 250);
        assert!(device.is_suitable());
    }

    #[test]
    fn compute_only_device_is_rejected() {
        let mut device = capable("compute");
        device.queue_families = vec![vk::QueueFlags::COMPUTE, vk::QueueFlags::TRANSFER];
        assert!(!device.is_suitable());
    }

    #[test]
    fn each_missing_extension_is_reported() {
        let mut device = capable("partial");
        device
            .extensions
            .retain(|e| {
                e.as_c_str() != c"VK_KHR_spirv_1_4" && e.as_c_str() != c"VK_KHR_create_renderpass2"
            });

        assert_eq!(
            device.unmet_requirements(),
            vec![
                "missing extension VK_KHR_spirv_1_4".to_string(),
                "missing extension VK_KHR_create_renderpass2".to_string(),
            ]
        );
    }

    #[test]
    fn missing_features_are_rejected() {
        let mut device = capable("no-dr");
        device.dynamic_rendering = false;
        assert!(!device.is_suitable());

        let mut device = capable("no-eds");
        device.extended_dynamic_state = false;
        assert!(!device.is_suitable());
    }

    #[test]
    fn first_suitable_device_wins() {
        let mut weak = capable("weak");
        weak.dynamic_rendering = false;
        let candidates = [weak, capable("first"), capable("second")];

        assert_eq!(select_device(&candidates), Some(1));
        assert_eq!(select_device(&candidates[..1]), None);
        assert_eq!(select_device(&[]), None);
    }

    #[test]
    fn graphics_family_that_presents_is_shared() {
        let families = [
            (vk::QueueFlags::TRANSFER, true),
            (vk::QueueFlags::GRAPHICS, true),
        ];
        let indices = QueueFamilyIndices::find(&families).unwrap();
        assert_eq!(indices, QueueFamilyIndices { graphics: 1, present: 1 });
        assert!(indices.is_shared());
        assert_eq!(indices.unique(), vec![1]);
    }

    #[test]
    fn later_family_doing_both_is_preferred_over_split() {
        let families = [
            (vk::QueueFlags::GRAPHICS, false),
            (vk::QueueFlags::COMPUTE, true),
            (vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, true),
        ];
        let indices = QueueFamilyIndices::find(&families).unwrap();
        assert_eq!(indices, QueueFamilyIndices { graphics: 2, present: 2 });
    }

    #[test]
    fn split_families_when_nothing_does_both() {
        let families = [
            (vk::QueueFlags::GRAPHICS, false),
            (vk::QueueFlags::TRANSFER, true),
        ];
        let indices = QueueFamilyIndices::find(&families).unwrap();
        assert_eq!(indices, QueueFamilyIndices { graphics: 0, present: 1 });
        assert_eq!(indices.unique(), vec![0, 1]);
    }

    #[test]
    fn no_present_or_no_graphics_is_none() {
        assert_eq!(QueueFamilyIndices::find(&[(vk::QueueFlags::GRAPHICS, false)]), None);
        assert_eq!(QueueFamilyIndices::find(&[(vk::QueueFlags::COMPUTE, true)]), None);
        assert_eq!(QueueFamilyIndices::find(&[]), None);
    }
}
