// The polarimeter reads exactly four digitizer channels, each with a fixed role:
// [physical channel] -> Role
// Three of them are detector planes (one in the scattering plane, two perpendicular
// to it) and the fourth carries the beam reference pulse used as the time-zero.
// Only the detector planes self-trigger the board; the beam reference is read along
// with them but never starts an acquisition window on its own.
use std::fmt::Display;

use super::constants::MAX_CHANNELS;
use super::error::ConfigurationError;

/// The role a digitizer channel plays in the measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    InPlane,
    OutPlane1,
    OutPlane2,
    Beam,
}

impl Role {
    /// All roles in record order
    pub const ALL: [Role; 4] = [Role::InPlane, Role::OutPlane1, Role::OutPlane2, Role::Beam];

    pub fn name(&self) -> &'static str {
        match self {
            Self::InPlane => "in_plane",
            Self::OutPlane1 => "out_plane_1",
            Self::OutPlane2 => "out_plane_2",
            Self::Beam => "beam",
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A detector plane, i.e. one of the three roles that produce pulse-shape data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Plane {
    In,
    Out1,
    Out2,
}

impl Plane {
    pub const ALL: [Plane; 3] = [Plane::In, Plane::Out1, Plane::Out2];

    /// Index of the plane, used to address per-plane storage
    pub fn index(&self) -> usize {
        match self {
            Self::In => 0,
            Self::Out1 => 1,
            Self::Out2 => 2,
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Self::In => Role::InPlane,
            Self::Out1 => Role::OutPlane1,
            Self::Out2 => Role::OutPlane2,
        }
    }
}

impl Display for Plane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.role())
    }
}

/// ChannelRoles maps physical digitizer channels to their measurement role.
///
/// The assignment is only valid if all four channels are distinct and exist on the board,
/// which is checked by [`ChannelRoles::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelRoles {
    pub in_plane: u16,
    pub out_plane_1: u16,
    pub out_plane_2: u16,
    pub beam: u16,
}

impl ChannelRoles {
    pub fn new(in_plane: u16, out_plane_1: u16, out_plane_2: u16, beam: u16) -> Self {
        Self {
            in_plane,
            out_plane_1,
            out_plane_2,
            beam,
        }
    }

    /// Physical channel assigned to a role
    pub fn channel(&self, role: Role) -> u16 {
        match role {
            Role::InPlane => self.in_plane,
            Role::OutPlane1 => self.out_plane_1,
            Role::OutPlane2 => self.out_plane_2,
            Role::Beam => self.beam,
        }
    }

    /// Role of a physical channel. Returns None if the channel has no role
    pub fn role_of(&self, channel: u16) -> Option<Role> {
        Role::ALL
            .into_iter()
            .find(|role| self.channel(*role) == channel)
    }

    /// Check that every role has its own channel and that the channel exists on the board.
    /// Boards reporting more than [`MAX_CHANNELS`] channels are limited to the first ones.
    pub fn validate(&self, n_channels: u32) -> Result<(), ConfigurationError> {
        let n_channels = n_channels.min(MAX_CHANNELS);
        for (idx, role) in Role::ALL.iter().enumerate() {
            let channel = self.channel(*role);
            if channel as u32 >= n_channels {
                return Err(ConfigurationError::ChannelOutOfRange {
                    channel,
                    role: *role,
                    n_channels,
                });
            }
            if let Some(first) = Role::ALL[..idx]
                .iter()
                .find(|other| self.channel(**other) == channel)
            {
                return Err(ConfigurationError::DuplicateChannel {
                    channel,
                    first: *first,
                    second: *role,
                });
            }
        }
        Ok(())
    }

    /// Bit mask of every channel which must be read out. Only meaningful once validated;
    /// channels beyond the mask width are left out
    pub fn enable_mask(&self) -> u32 {
        Role::ALL
            .iter()
            .fold(0, |mask, role| mask | channel_bit(self.channel(*role)))
    }

    /// Bit mask of the channels allowed to self-trigger (the detector planes)
    pub fn trigger_mask(&self) -> u32 {
        Plane::ALL
            .iter()
            .fold(0, |mask, plane| mask | channel_bit(self.channel(plane.role())))
    }
}

fn channel_bit(channel: u16) -> u32 {
    1u32.checked_shl(channel as u32).unwrap_or(0)
}

impl Default for ChannelRoles {
    fn default() -> Self {
        Self::new(0, 1, 2, 3)
    }
}
