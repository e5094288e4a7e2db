//! Снимок памяти процесса и системы.

use sysinfo::System;

use crate::error::MemoryGuardError;

/// Счётчики памяти в байтах.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySnapshot {
    pub total_bytes: u64,
    pub resident_bytes: u64,
}

impl MemorySnapshot {
    /// Запас памяти: физическая память минус резидентная память процесса.
    pub fn headroom_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.resident_bytes)
    }
}

/// Источник счётчиков памяти. По умолчанию — [`SystemReader`] (sysinfo).
pub trait MemoryReader: Send + Sync {
    fn snapshot(&self) -> Result<MemorySnapshot, MemoryGuardError>;
}

/// Счётчики ОС через sysinfo. Каждый вызов строит свежий `System`:
/// обновляются только память и текущий процесс.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemReader;

impl MemoryReader for SystemReader {
    fn snapshot(&self) -> Result<MemorySnapshot, MemoryGuardError> {
        let pid = sysinfo::get_current_pid().map_err(|e| MemoryGuardError::Unavailable(e.to_string()))?;

        let mut sys = System::new();
        sys.refresh_memory();
        if !sys.refresh_process(pid) {
            return Err(MemoryGuardError::Unavailable(format!(
                "process {pid} is not visible to sysinfo"
            )));
        }

        let resident_bytes = sys
            .process(pid)
            .map(|p| p.memory())
            .ok_or_else(|| MemoryGuardError::Unavailable(format!("no memory info for process {pid}")))?;

        let total_bytes = sys.total_memory();
        if total_bytes == 0 {
            return Err(MemoryGuardError::Unavailable("total memory reported as 0".into()));
        }

        Ok(MemorySnapshot {
            total_bytes,
            resident_bytes,
        })
    }
}
