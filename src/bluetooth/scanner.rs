/// Bluetooth Low Energy adapter setup and sensor discovery
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio::time::{sleep, Duration};

/// Open the default Bluetooth adapter and make sure it is powered on
pub async fn open_adapter() -> Result<bluer::Adapter, Box<dyn std::error::Error>> {
    // Initialize Bluetooth session
    let session = match bluer::Session::new().await {
        Ok(session) => session,
        Err(e) => {
            error!("Failed to create Bluetooth session: {}", e);
            return Err(e.into());
        }
    };

    // Get the default Bluetooth adapter
    let adapter = match session.default_adapter().await {
        Ok(adapter) => adapter,
        Err(e) => {
            error!("Failed to get default Bluetooth adapter: {}", e);
            return Err(e.into());
        }
    };

    // Ensure Bluetooth adapter is powered on
    if let Err(e) = adapter.set_powered(true).await {
        error!("Failed to power on adapter: {}", e);
        return Err(e.into());
    }

    info!("Using Bluetooth adapter {}", adapter.name());
    Ok(adapter)
}

/// Whether an advertised device name identifies one of our sensors
pub fn is_target_sensor(advertised: Option<&str>, sensor_name: &str) -> bool {
    advertised.map_or(false, |name| name.trim() == sensor_name)
}

/// Scan for sensors advertising `sensor_name`
///
/// Discovery runs for `scan_duration` and then every device BlueZ knows about
/// is checked by name. Devices stay known to BlueZ after the scan, which is
/// what lets the fetch session connect to them by address afterwards.
///
/// # Returns
/// Upper-case addresses of the matching devices, in adapter order
pub async fn scan_for_sensors(
    adapter: &bluer::Adapter,
    sensor_name: &str,
    scan_duration: Duration,
) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    // Configure discovery filter for Low Energy devices only
    let filter = bluer::DiscoveryFilter {
        transport: bluer::DiscoveryTransport::Le, // Bluetooth Low Energy only
        duplicate_data: false,                    // Filter out duplicate advertisements
        ..Default::default()
    };

    // Apply the discovery filter (warn if it fails, but continue)
    if let Err(e) = adapter.set_discovery_filter(filter).await {
        warn!("Failed to set discovery filter: {}", e);
    }

    // Start device discovery in background
    let discovery_handle = {
        match adapter.discover_devices().await {
            Ok(discovery_stream) => tokio::spawn(async move {
                let mut stream = discovery_stream;
                while let Some(event) = stream.next().await {
                    debug!("Discovery event: {:?}", event);
                }
            }),
            Err(e) => {
                error!("Failed to start device discovery: {}", e);
                return Err(e.into());
            }
        }
    };

    // Let discovery run for the configured duration
    sleep(scan_duration).await;

    // Stop discovery
    discovery_handle.abort();

    // Get all discovered device addresses
    let addresses = match adapter.device_addresses().await {
        Ok(addresses) => addresses,
        Err(e) => {
            error!("Failed to get device addresses: {}", e);
            return Err(e.into());
        }
    };

    let mut found = Vec::new();
    for addr in addresses {
        let device = match adapter.device(addr) {
            Ok(device) => device,
            Err(_) => continue,
        };

        let name = match device.name().await {
            Ok(name) => name,
            Err(e) => {
                debug!("Failed to get name for {}: {}", addr, e);
                continue;
            }
        };

        if is_target_sensor(name.as_deref(), sensor_name) {
            let addr_str = addr.to_string().to_uppercase();
            debug!("Found {} at {}", sensor_name, addr_str);
            found.push(addr_str);
        }
    }

    info!("Scan finished, {} sensor(s) found", found.len());
    Ok(found)
}
