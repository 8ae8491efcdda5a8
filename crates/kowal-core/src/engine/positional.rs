//! Positional audio: distance attenuation, cones, panning and doppler
//!
//! Runs on the control thread once per `update()` for every playing
//! positional event. Its only outputs are a per-channel gain and a pitch
//! factor, which are published to the mixer like any other parameter.

use glam::Vec3;

use super::definition::EventDefinition;
use crate::error::{KwlError, KwlResult};

/// Pan gain every channel keeps, even for a source hard to the other side
const PAN_FLOOR: f32 = 0.2;

/// Doppler factor used when the formula goes negative
const MIN_DOPPLER_FACTOR: f32 = 0.0001;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceModel {
    Constant,
    InverseDistance,
    Linear,
}

/// Distance attenuation parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceAttenuation {
    pub model: DistanceModel,
    /// Never amplify above unit gain
    pub clamp: bool,
    /// Sources beyond this are silent; 0 disables the limit
    pub max_distance: f32,
    pub rolloff: f32,
    pub reference_distance: f32,
}

impl Default for DistanceAttenuation {
    fn default() -> Self {
        Self {
            model: DistanceModel::InverseDistance,
            clamp: true,
            max_distance: 0.0,
            rolloff: 1.0,
            reference_distance: 1.0,
        }
    }
}

impl DistanceAttenuation {
    pub fn new(
        model: DistanceModel,
        clamp: bool,
        max_distance: f32,
        rolloff: f32,
        reference_distance: f32,
    ) -> KwlResult<Self> {
        if rolloff < 0.0 {
            return Err(KwlError::InvalidParameterValue("rolloff must be >= 0"));
        }
        if reference_distance <= 0.0 {
            return Err(KwlError::InvalidParameterValue(
                "reference distance must be > 0",
            ));
        }
        if max_distance > 0.0 && reference_distance >= max_distance {
            return Err(KwlError::InvalidParameterValue(
                "reference distance must be below max distance",
            ));
        }
        Ok(Self {
            model,
            clamp,
            max_distance,
            rolloff,
            reference_distance,
        })
    }

    /// Gain for a source at `distance`
    pub fn gain(&self, distance: f32) -> f32 {
        if self.max_distance > 0.0 && distance > self.max_distance {
            return 0.0;
        }
        let reference = self.reference_distance;

        match self.model {
            DistanceModel::Constant => 1.0,
            DistanceModel::InverseDistance => {
                let gain = reference / (reference + self.rolloff * (distance - reference));
                if self.clamp {
                    gain.min(1.0)
                } else {
                    gain
                }
            }
            DistanceModel::Linear => {
                // Without a max distance there is nothing to fade towards
                if self.max_distance <= 0.0 {
                    return 1.0;
                }
                let gain =
                    (1.0 - self.rolloff * (distance - reference) / (self.max_distance - reference))
                        .max(0.0);
                if self.clamp {
                    gain.min(1.0)
                } else {
                    gain
                }
            }
        }
    }
}

/// Engine-wide positional settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionalSettings {
    pub distance: DistanceAttenuation,
    pub speed_of_sound: f32,
    /// 0 disables doppler, 1 applies it fully
    pub doppler_scale: f32,
    pub event_cones: bool,
    pub listener_cone: bool,
}

impl Default for PositionalSettings {
    fn default() -> Self {
        Self {
            distance: DistanceAttenuation::default(),
            speed_of_sound: 343.0,
            doppler_scale: 1.0,
            event_cones: false,
            listener_cone: false,
        }
    }
}

impl PositionalSettings {
    pub fn set_doppler(&mut self, speed_of_sound: f32, doppler_scale: f32) -> KwlResult<()> {
        if speed_of_sound <= 0.0 {
            return Err(KwlError::InvalidParameterValue(
                "speed of sound must be > 0",
            ));
        }
        if !(0.0..=1.0).contains(&doppler_scale) {
            return Err(KwlError::InvalidParameterValue(
                "doppler scale must be in [0, 1]",
            ));
        }
        self.speed_of_sound = speed_of_sound;
        self.doppler_scale = doppler_scale;
        Ok(())
    }
}

/// Convert a full cone angle in degrees to the cosine of its half angle
pub fn cone_cos(angle_degrees: f32) -> f32 {
    (angle_degrees.to_radians() / 2.0).cos()
}

/// Gain for a direction with cosine `cos_angle` to a cone's axis
///
/// Unit gain inside the inner cone, `outer_gain` outside the outer cone,
/// linear in the cosine between them.
pub fn cone_gain(cos_angle: f32, cos_inner: f32, cos_outer: f32, outer_gain: f32) -> f32 {
    if cos_angle < cos_outer {
        outer_gain
    } else if cos_angle < cos_inner {
        let span = cos_inner - cos_outer;
        let t = if span != 0.0 {
            (cos_angle - cos_outer) / span
        } else {
            1.0
        };
        outer_gain + t * (1.0 - outer_gain)
    } else {
        1.0
    }
}

/// The listener's pose and cone
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Listener {
    pub position: Vec3,
    pub velocity: Vec3,
    pub direction: Vec3,
    pub up: Vec3,
    /// `direction × up`
    pub right: Vec3,
    pub inner_cone_cos: f32,
    pub outer_cone_cos: f32,
    pub outer_cone_gain: f32,
}

impl Default for Listener {
    fn default() -> Self {
        let direction = Vec3::NEG_Z;
        let up = Vec3::Y;
        Self {
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            direction,
            up,
            right: direction.cross(up),
            inner_cone_cos: 1.0,
            outer_cone_cos: 1.0,
            outer_cone_gain: 1.0,
        }
    }
}

impl Listener {
    pub fn set_orientation(&mut self, direction: Vec3, up: Vec3) -> KwlResult<()> {
        if direction == Vec3::ZERO || up == Vec3::ZERO {
            return Err(KwlError::InvalidParameterValue(
                "listener orientation vectors must be non-zero",
            ));
        }
        self.direction = direction.normalize();
        self.up = up.normalize();
        self.right = self.direction.cross(self.up);
        Ok(())
    }

    pub fn set_cone(&mut self, inner_degrees: f32, outer_degrees: f32, outer_gain: f32) -> KwlResult<()> {
        if !(0.0..=360.0).contains(&inner_degrees) || !(0.0..=360.0).contains(&outer_degrees) {
            return Err(KwlError::InvalidParameterValue(
                "cone angles must be in [0, 360]",
            ));
        }
        if outer_degrees < inner_degrees {
            return Err(KwlError::InvalidParameterValue(
                "outer cone angle must not be below inner angle",
            ));
        }
        if outer_gain < 0.0 {
            return Err(KwlError::InvalidParameterValue("outer cone gain must be >= 0"));
        }
        self.inner_cone_cos = cone_cos(inner_degrees);
        self.outer_cone_cos = cone_cos(outer_degrees);
        self.outer_cone_gain = outer_gain;
        Ok(())
    }
}

/// Spatial state of a positional event instance
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Emitter {
    pub position: Vec3,
    pub velocity: Vec3,
    pub direction: Vec3,
}

impl Default for Emitter {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            direction: Vec3::NEG_Z,
        }
    }
}

/// Result of the positional computation for one event
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spatialization {
    pub gain: [f32; 2],
    pub pitch: f32,
}

/// Compute gain and doppler pitch of an emitter as heard by the listener
pub fn spatialize(
    listener: &Listener,
    settings: &PositionalSettings,
    emitter: &Emitter,
    definition: &EventDefinition,
) -> Spatialization {
    let offset = listener.position - emitter.position;
    let distance = offset.length();
    let to_listener = offset.normalize_or_zero();

    let distance_gain = settings.distance.gain(distance);

    let side = -to_listener.dot(listener.right);
    let pan = [PAN_FLOOR + (-side).max(0.0), PAN_FLOOR + side.max(0.0)];

    let mut cone = 1.0;
    if settings.event_cones && definition.outer_cone_gain != 1.0 {
        cone = cone_gain(
            emitter.direction.dot(to_listener),
            definition.inner_cone_cos,
            definition.outer_cone_cos,
            definition.outer_cone_gain,
        );
    }
    if settings.listener_cone && listener.outer_cone_gain != 1.0 {
        cone *= cone_gain(
            (-listener.direction).dot(to_listener),
            listener.inner_cone_cos,
            listener.outer_cone_cos,
            listener.outer_cone_gain,
        );
    }

    let v_listener = listener.velocity.dot(to_listener);
    let v_emitter = emitter.velocity.dot(to_listener);
    let scale = settings.doppler_scale;
    let c = settings.speed_of_sound;
    let mut doppler = (1.0 - scale) + scale * (c - v_listener) / (c - v_emitter);
    if !(doppler >= 0.0) {
        doppler = MIN_DOPPLER_FACTOR;
    }

    let gain = cone * distance_gain;
    Spatialization {
        gain: [gain * pan[0], gain * pan[1]],
        pitch: doppler,
    }
}
