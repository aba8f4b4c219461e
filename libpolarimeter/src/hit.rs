use super::channel_roles::Role;

/// HitData is one digitizer trigger: the resolved timestamp and the waveform of every role.
///
/// Each waveform either has the configured record length or is empty if that channel was
/// missing from the trigger. Hits are built once by a session and moved, never modified,
/// through the queue to the processor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HitData {
    pub module: u16,
    pub timestamp: u64,
    pub in_plane: Vec<u16>,
    pub out_plane_1: Vec<u16>,
    pub out_plane_2: Vec<u16>,
    pub beam: Vec<u16>,
}

impl HitData {
    pub fn new(module: u16, timestamp: u64) -> Self {
        Self {
            module,
            timestamp,
            ..Default::default()
        }
    }

    /// Set the waveform of a role. Used while a hit is being built
    pub fn with_samples(mut self, role: Role, samples: Vec<u16>) -> Self {
        *self.samples_mut(role) = samples;
        self
    }

    pub fn samples(&self, role: Role) -> &[u16] {
        match role {
            Role::InPlane => &self.in_plane,
            Role::OutPlane1 => &self.out_plane_1,
            Role::OutPlane2 => &self.out_plane_2,
            Role::Beam => &self.beam,
        }
    }

    fn samples_mut(&mut self, role: Role) -> &mut Vec<u16> {
        match role {
            Role::InPlane => &mut self.in_plane,
            Role::OutPlane1 => &mut self.out_plane_1,
            Role::OutPlane2 => &mut self.out_plane_2,
            Role::Beam => &mut self.beam,
        }
    }

    /// Approximate heap footprint of the waveforms in bytes
    pub fn size_bytes(&self) -> usize {
        Role::ALL
            .iter()
            .map(|role| self.samples(*role).len() * std::mem::size_of::<u16>())
            .sum::<usize>()
            + std::mem::size_of::<Self>()
    }
}
