//! wgpu backend for the two-pass separator scan.
//!
//! Pass one computes the quote parity of each 256-byte tile on the GPU; the
//! host folds the tile parities into per-tile entry states with a prefix
//! XOR (O(tiles), off the critical path) and writes them back; pass two
//! extracts separators per tile into pre-partitioned output regions. A
//! single-pass variant cannot work here: a quoted field longer than one
//! tile needs the entry state of every tile before extraction starts.
//!
//! The GPU device is a process-wide shared resource managed by
//! [`DevicePool`]: acquisition is reference-counted, release is
//! non-destructive, and the underlying device is only destroyed on an
//! explicit dispose (or automatically once the active count reaches zero
//! when auto-dispose is enabled). Dispatches from concurrent parses are
//! serialized on the device.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use tracing::debug;
use wgpu::util::DeviceExt;

use super::scan::{pack_separator, ScanResult, TILE_SIZE};
use crate::error::{CsvError, Result};

/// Largest sub-chunk handed to a single dispatch. Larger chunks are split
/// on the host with quote-state carry between the pieces.
pub(crate) const MAX_DISPATCH_BYTES: usize = 1 << 20;

/// A wgpu device and queue shared by all indexers in the process.
pub struct GpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    /// GPU dispatches are serialized at this layer.
    dispatch_lock: tokio::sync::Mutex<()>,
}

impl GpuDevice {
    async fn request() -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .await
            .ok_or_else(|| CsvError::BackendUnavailable {
                message: "no suitable GPU adapter".to_string(),
            })?;
        debug!(adapter = %adapter.get_info().name, "GPU adapter selected");
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("csv-indexer"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::downlevel_defaults(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .map_err(|err| CsvError::BackendUnavailable {
                message: err.to_string(),
            })?;
        Ok(Self {
            device,
            queue,
            dispatch_lock: tokio::sync::Mutex::new(()),
        })
    }
}

/// Reference-counted access to the process-wide GPU device.
#[derive(Default)]
pub struct DevicePool {
    slot: Mutex<Option<Arc<GpuDevice>>>,
    active: AtomicUsize,
    auto_dispose: AtomicBool,
    dispose_requested: AtomicBool,
}

impl DevicePool {
    /// The process-wide pool.
    pub fn global() -> &'static DevicePool {
        static POOL: OnceLock<DevicePool> = OnceLock::new();
        POOL.get_or_init(DevicePool::default)
    }

    /// Acquire the shared device, creating it on first use. Increments the
    /// active-operation count.
    pub async fn acquire(&self) -> Result<Arc<GpuDevice>> {
        if let Some(device) = self.slot.lock().unwrap().clone() {
            self.active.fetch_add(1, Ordering::SeqCst);
            return Ok(device);
        }
        let created = Arc::new(GpuDevice::request().await?);
        let device = {
            let mut slot = self.slot.lock().unwrap();
            slot.get_or_insert_with(|| created.clone()).clone()
        };
        self.active.fetch_add(1, Ordering::SeqCst);
        Ok(device)
    }

    /// Non-destructive release: decrements the count. The device is torn
    /// down only when a dispose was requested (or auto-dispose is on) and
    /// no operation remains active.
    pub fn release(&self) {
        let remaining = self.active.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining == 0
            && (self.dispose_requested.swap(false, Ordering::SeqCst)
                || self.auto_dispose.load(Ordering::SeqCst))
        {
            self.slot.lock().unwrap().take();
        }
    }

    /// Destroy the device once the active count reaches zero.
    pub fn dispose(&self) {
        if self.active.load(Ordering::SeqCst) == 0 {
            self.slot.lock().unwrap().take();
        } else {
            self.dispose_requested.store(true, Ordering::SeqCst);
        }
    }

    pub fn set_auto_dispose(&self, enabled: bool) {
        self.auto_dispose.store(enabled, Ordering::SeqCst);
    }

    /// Number of operations currently holding the device.
    pub fn active_operations(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

/// Two-pass GPU separator scanner with streaming quote state.
pub(crate) struct GpuScanner {
    device: Arc<GpuDevice>,
    pass1: wgpu::ComputePipeline,
    pass2: wgpu::ComputePipeline,
    delimiter: u8,
    quote: u8,
    in_quote: bool,
}

impl GpuScanner {
    pub(crate) async fn new(delimiter: u8, quote: u8) -> Result<Self> {
        let device = DevicePool::global().acquire().await?;
        let pass1 = Self::pipeline(
            &device.device,
            "csv-quote-parity",
            include_str!("shaders/quote_parity.wgsl"),
        );
        let pass2 = Self::pipeline(
            &device.device,
            "csv-extract-separators",
            include_str!("shaders/extract_separators.wgsl"),
        );
        Ok(Self {
            device,
            pass1,
            pass2,
            delimiter,
            quote,
            in_quote: false,
        })
    }

    fn pipeline(device: &wgpu::Device, label: &str, source: &str) -> wgpu::ComputePipeline {
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(label),
            layout: None,
            module: &module,
            entry_point: "main",
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        })
    }

    pub(crate) fn set_in_quote(&mut self, in_quote: bool) {
        self.in_quote = in_quote;
    }

    /// Scan a chunk, splitting into dispatch-sized sub-chunks and carrying
    /// quote state between them.
    pub(crate) async fn scan(&mut self, chunk: &[u8]) -> Result<ScanResult> {
        let mut separators = Vec::with_capacity(chunk.len() / 4);
        let mut base = 0usize;
        while base < chunk.len() {
            let end = (base + MAX_DISPATCH_BYTES).min(chunk.len());
            if end - base < chunk.len() {
                debug!(from = base, to = end, "splitting oversized chunk for dispatch");
            }
            let sub = &chunk[base..end];
            let (mut packed, end_in_quote) = self.dispatch(sub, self.in_quote).await?;
            for value in &mut packed {
                let offset = super::scan::unpack_offset(*value) + base as u32;
                *value = pack_separator(offset, super::scan::unpack_type(*value));
            }
            separators.extend(packed);
            self.in_quote = end_in_quote;
            base = end;
        }
        Ok(ScanResult {
            separators,
            end_in_quote: self.in_quote,
        })
    }

    /// One two-pass dispatch over at most [`MAX_DISPATCH_BYTES`] bytes.
    /// Returned offsets are relative to the sub-chunk.
    async fn dispatch(&self, sub: &[u8], prev_in_quote: bool) -> Result<(Vec<u32>, bool)> {
        if sub.is_empty() {
            return Ok((Vec::new(), prev_in_quote));
        }
        let _serialized = self.device.dispatch_lock.lock().await;
        let device = &self.device.device;
        let queue = &self.device.queue;

        let tiles = sub.len().div_ceil(TILE_SIZE);
        let words = pack_words(sub);
        let params: [u32; 4] = [
            sub.len() as u32,
            self.quote as u32,
            self.delimiter as u32,
            TILE_SIZE as u32,
        ];

        let input_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("csv-indexer-input"),
            contents: bytemuck::cast_slice(&words),
            usage: wgpu::BufferUsages::STORAGE,
        });
        let params_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("csv-indexer-params"),
            contents: bytemuck::cast_slice(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let parity_buf = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("csv-indexer-parity"),
            size: (tiles * 4) as u64,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let parity_read = staging_buffer(device, "csv-indexer-parity-read", (tiles * 4) as u64);

        // Pass 1: per-tile parity.
        let bind1 = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("csv-indexer-pass1"),
            layout: &self.pass1.get_bind_group_layout(0),
            entries: &[
                bind_entry(0, &input_buf),
                bind_entry(1, &params_buf),
                bind_entry(2, &parity_buf),
            ],
        });
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("csv-indexer-pass1"),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("csv-indexer-pass1"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pass1);
            pass.set_bind_group(0, &bind1, &[]);
            pass.dispatch_workgroups(tiles as u32, 1, 1);
        }
        encoder.copy_buffer_to_buffer(&parity_buf, 0, &parity_read, 0, (tiles * 4) as u64);
        queue.submit(Some(encoder.finish()));

        let parities = read_u32_buffer(device, &parity_read).await?;

        // Host prefix XOR, seeded by the incoming quote state: the state
        // entering each tile overwrites the parity buffer for pass 2.
        let mut entry_states = Vec::with_capacity(tiles);
        let mut state = prev_in_quote;
        for &parity in parities.iter().take(tiles) {
            entry_states.push(state as u32);
            state ^= parity != 0;
        }
        let end_in_quote = state;
        queue.write_buffer(&parity_buf, 0, bytemuck::cast_slice(&entry_states));

        // Pass 2: extraction into pre-partitioned tile regions.
        let out_len = (tiles * TILE_SIZE * 4) as u64;
        let out_seps = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("csv-indexer-separators"),
            size: out_len,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let counts_buf = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("csv-indexer-counts"),
            size: (tiles * 4) as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let seps_read = staging_buffer(device, "csv-indexer-separators-read", out_len);
        let counts_read = staging_buffer(device, "csv-indexer-counts-read", (tiles * 4) as u64);

        let bind2 = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("csv-indexer-pass2"),
            layout: &self.pass2.get_bind_group_layout(0),
            entries: &[
                bind_entry(0, &input_buf),
                bind_entry(1, &params_buf),
                bind_entry(2, &parity_buf),
                bind_entry(3, &out_seps),
                bind_entry(4, &counts_buf),
            ],
        });
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("csv-indexer-pass2"),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("csv-indexer-pass2"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pass2);
            pass.set_bind_group(0, &bind2, &[]);
            pass.dispatch_workgroups(tiles as u32, 1, 1);
        }
        encoder.copy_buffer_to_buffer(&out_seps, 0, &seps_read, 0, out_len);
        encoder.copy_buffer_to_buffer(&counts_buf, 0, &counts_read, 0, (tiles * 4) as u64);
        queue.submit(Some(encoder.finish()));

        let raw = read_u32_buffer(device, &seps_read).await?;
        let counts = read_u32_buffer(device, &counts_read).await?;

        // Compact the per-tile regions; tiles are offset-disjoint, so the
        // result is sorted without a merge.
        let mut separators = Vec::with_capacity(counts.iter().map(|&c| c as usize).sum());
        for (g, &count) in counts.iter().take(tiles).enumerate() {
            let start = g * TILE_SIZE;
            separators.extend_from_slice(&raw[start..start + count as usize]);
        }
        debug_assert!(separators
            .windows(2)
            .all(|w| super::scan::unpack_offset(w[0]) < super::scan::unpack_offset(w[1])));

        Ok((separators, end_in_quote))
    }
}

impl Drop for GpuScanner {
    fn drop(&mut self) {
        DevicePool::global().release();
    }
}

fn bind_entry(binding: u32, buffer: &wgpu::Buffer) -> wgpu::BindGroupEntry<'_> {
    wgpu::BindGroupEntry {
        binding,
        resource: buffer.as_entire_binding(),
    }
}

fn staging_buffer(device: &wgpu::Device, label: &str, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

/// Pack bytes into little-endian 32-bit words for the storage binding.
fn pack_words(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks(4)
        .map(|chunk| {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            u32::from_le_bytes(word)
        })
        .collect()
}

/// Map a staging buffer and copy its contents out. A mapping failure means
/// the device went away mid-computation.
async fn read_u32_buffer(device: &wgpu::Device, buffer: &wgpu::Buffer) -> Result<Vec<u32>> {
    let slice = buffer.slice(..);
    let (tx, rx) = futures::channel::oneshot::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    let _ = device.poll(wgpu::Maintain::Wait);
    match rx.await {
        Ok(Ok(())) => {}
        _ => {
            return Err(CsvError::DeviceLost {
                message: "staging buffer mapping failed".to_string(),
            });
        }
    }
    let data = slice.get_mapped_range();
    let out: Vec<u32> = bytemuck::cast_slice(&data).to_vec();
    drop(data);
    buffer.unmap();
    Ok(out)
}
