//! View binding: which viewpoint this peer drives and where it sits each frame.
//!
//! Each peer drives exactly one viewpoint, the one belonging to the avatar of
//! its role. The other role's viewpoint is switched off locally at bind time.
//! Every frame the bound viewpoint either rides on top of the avatar
//! (first-person) or follows it on a "soft leash": it stays at its resting
//! pose while the avatar is inside the `x_bounds`/`z_bounds` rectangle, and
//! shifts by the avatar's planar displacement once it leaves it.

use crate::capabilities::{MessageOverlay, ViewportSink};
use crate::config::ViewConfig;
use crate::error::SimError;
use crate::types::{AvatarTag, Role};
use glam::{EulerRot, Quat, Vec3};
use log::{debug, error, info, trace};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A camera-like transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewpoint {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Viewpoint {
    /// Heading around the vertical axis, in radians.
    pub fn yaw(&self) -> f32 {
        let (yaw, _, _) = self.rotation.to_euler(EulerRot::YXZ);
        yaw
    }

    pub fn rotate_yaw(&mut self, degrees: f32) {
        self.rotation = Quat::from_rotation_y(degrees.to_radians()) * self.rotation;
    }

    /// Facing direction; +Z at zero rotation.
    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::Z
    }
}

/// The two viewport outputs a scene provides, one per avatar.
#[derive(Default)]
pub struct ViewportSinks {
    pub host: Option<Box<dyn ViewportSink + Send>>,
    pub client: Option<Box<dyn ViewportSink + Send>>,
}

impl ViewportSinks {
    fn take(&mut self, tag: AvatarTag) -> Option<Box<dyn ViewportSink + Send>> {
        match tag {
            AvatarTag::Host => self.host.take(),
            AvatarTag::Client => self.client.take(),
        }
    }
}

pub struct ViewBinder {
    config: ViewConfig,
    bound: Option<AvatarTag>,
    viewpoint: Viewpoint,
    sink: Option<Box<dyn ViewportSink + Send>>,
}

impl ViewBinder {
    /// Resolves the local viewpoint for `role` and disables the other one.
    ///
    /// A missing sink for the role's own avatar leaves the binder unbound:
    /// the session keeps running without view updates.
    pub fn bind(role: Role, config: ViewConfig, mut sinks: ViewportSinks) -> Self {
        let own = role.avatar();
        let other = own.other();

        if let Some(mut unused) = sinks.take(other) {
            unused.set_active(false);
            info!("Disabled {} viewpoint locally", other);
        }

        let viewpoint = Self::resting_pose(&config);
        let (bound, sink) = match sinks.take(own) {
            Some(mut sink) => {
                sink.set_active(true);
                sink.set_position(viewpoint.position);
                sink.set_rotation(viewpoint.rotation);
                info!(
                    "Bound viewpoint to {} at {:?}",
                    own, viewpoint.position
                );
                (Some(own), Some(sink))
            }
            None => {
                let err = SimError::MissingDependency(format!("viewport for {}", own));
                error!("{}; view binding disabled", err);
                (None, None)
            }
        };

        Self {
            config,
            bound,
            viewpoint,
            sink,
        }
    }

    /// Pose the viewpoint takes while the avatar is inside the rest bounds.
    pub fn resting_pose(config: &ViewConfig) -> Viewpoint {
        Viewpoint {
            position: config.rest_position,
            rotation: Quat::from_rotation_x(config.rest_pitch.to_radians()),
        }
    }

    pub fn bound_avatar(&self) -> Option<AvatarTag> {
        self.bound
    }

    pub fn viewpoint(&self) -> Option<&Viewpoint> {
        self.bound.map(|_| &self.viewpoint)
    }

    /// Mutable access for the controller of the bound avatar (first-person turning).
    pub fn viewpoint_for(&mut self, tag: AvatarTag) -> Option<&mut Viewpoint> {
        if self.bound == Some(tag) {
            Some(&mut self.viewpoint)
        } else {
            None
        }
    }

    /// Whether the avatar has left the rest rectangle around the origin.
    pub fn is_outside_bounds(&self, avatar_position: Vec3) -> bool {
        let (x_min, x_max) = self.config.x_bounds;
        let (z_min, z_max) = self.config.z_bounds;
        avatar_position.x < x_min
            || avatar_position.x > x_max
            || avatar_position.z < z_min
            || avatar_position.z > z_max
    }

    /// Repositions the bound viewpoint from the avatar's replicated state.
    pub fn update(&mut self, avatar_position: Vec3, first_person: bool) -> Option<Viewpoint> {
        self.bound?;

        if first_person {
            let yaw = self.viewpoint.yaw();
            self.viewpoint.position =
                avatar_position + Vec3::Y * self.config.first_person_height;
            self.viewpoint.rotation = Quat::from_rotation_y(yaw);
        } else {
            let rest = Self::resting_pose(&self.config);
            self.viewpoint.rotation = rest.rotation;
            self.viewpoint.position = if self.is_outside_bounds(avatar_position) {
                let offset = avatar_position - self.config.avatar_rest_point;
                rest.position + Vec3::new(offset.x, 0.0, offset.z)
            } else {
                rest.position
            };
        }

        trace!(
            "Viewpoint at {:?} (first person: {})",
            self.viewpoint.position,
            first_person
        );
        if let Some(sink) = self.sink.as_mut() {
            sink.set_position(self.viewpoint.position);
            sink.set_rotation(self.viewpoint.rotation);
        }
        Some(self.viewpoint)
    }
}

/// Last pose pushed to a [`LoggingViewport`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportState {
    pub position: Vec3,
    pub rotation: Quat,
    pub active: bool,
}

impl Default for ViewportState {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            active: true,
        }
    }
}

/// Headless viewport: records the pose it receives and traces it.
#[derive(Debug, Clone)]
pub struct LoggingViewport {
    name: String,
    state: Arc<Mutex<ViewportState>>,
}

impl LoggingViewport {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(ViewportState::default())),
        }
    }

    /// Handle for reading the recorded pose after the sink has been handed out.
    pub fn state(&self) -> Arc<Mutex<ViewportState>> {
        Arc::clone(&self.state)
    }

    fn update(&self, apply: impl FnOnce(&mut ViewportState)) {
        match self.state.lock() {
            Ok(mut state) => apply(&mut state),
            Err(poisoned) => apply(&mut poisoned.into_inner()),
        }
    }
}

impl ViewportSink for LoggingViewport {
    fn set_position(&mut self, position: Vec3) {
        trace!("{} position {:?}", self.name, position);
        self.update(|state| state.position = position);
    }

    fn set_rotation(&mut self, rotation: Quat) {
        self.update(|state| state.rotation = rotation);
    }

    fn set_active(&mut self, active: bool) {
        info!("{} active: {}", self.name, active);
        self.update(|state| state.active = active);
    }
}

/// Headless message overlay: logs visibility changes and remembers them.
#[derive(Debug, Clone, Default)]
pub struct LoggingOverlay {
    visible: Arc<Mutex<HashMap<AvatarTag, bool>>>,
}

impl LoggingOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last visibility shown for `avatar`; `None` if it never changed.
    pub fn is_visible(&self, avatar: AvatarTag) -> Option<bool> {
        match self.visible.lock() {
            Ok(visible) => visible.get(&avatar).copied(),
            Err(poisoned) => poisoned.into_inner().get(&avatar).copied(),
        }
    }
}

impl MessageOverlay for LoggingOverlay {
    fn set_message_visible(&mut self, avatar: AvatarTag, visible: bool) {
        if visible {
            info!("[{}] Hello!", avatar);
        } else {
            debug!("[{}] message hidden", avatar);
        }
        match self.visible.lock() {
            Ok(mut shown) => shown.insert(avatar, visible),
            Err(poisoned) => poisoned.into_inner().insert(avatar, visible),
        };
    }
}
