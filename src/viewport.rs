use crate::config::EngineConfig;
use crate::mask::Point;

const MIN_ZOOM: f32 = 1.0;
const MIN_PINCH_DISTANCE: f32 = 1.0;

#[derive(Debug, Clone, Default)]
struct GestureState {
    last_pinch_distance: Option<f32>,
    last_pinch_midpoint: Option<Point>,
    last_pan_point: Option<Point>,
    is_panning: bool,
}

#[derive(Debug, Clone)]
/// Zoom and pan of the displayed image, independent of pixel data.
///
/// Viewport coordinates map to image coordinates as
/// `image = (viewport - pan) / zoom`. At zoom 1.0 the pan is pinned to the
/// origin and pan mode is off.
pub struct ViewTransform {
    zoom: f32,
    pan: Point,
    zoom_max: f32,
    wheel_sensitivity: f32,
    pan_mode: bool,
    gesture: GestureState,
}

impl ViewTransform {
    pub fn new(zoom_max: f32, wheel_sensitivity: f32) -> Self {
        Self {
            zoom: MIN_ZOOM,
            pan: Point::ORIGIN,
            zoom_max: zoom_max.max(MIN_ZOOM),
            wheel_sensitivity,
            pan_mode: false,
            gesture: GestureState::default(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.zoom_max(), config.wheel_zoom_sensitivity())
    }

    pub fn zoom(&self) -> f32 {
        self.zoom
    }

    pub fn pan(&self) -> Point {
        self.pan
    }

    pub fn zoom_max(&self) -> f32 {
        self.zoom_max
    }

    pub fn pan_mode(&self) -> bool {
        self.pan_mode
    }

    pub fn is_panning(&self) -> bool {
        self.gesture.is_panning
    }

    /// Image coordinate currently displayed at viewport point `p`.
    pub fn image_point_at(&self, p: Point) -> Point {
        Point::new((p.x - self.pan.x) / self.zoom, (p.y - self.pan.y) / self.zoom)
    }

    /// Sets the zoom, keeping the image point under `focal` fixed on screen.
    pub fn zoom_to(&mut self, zoom: f32, focal: Point) {
        if !zoom.is_finite() {
            return;
        }
        let next = zoom.clamp(MIN_ZOOM, self.zoom_max);
        let anchor = self.image_point_at(focal);
        self.pan = Point::new(focal.x - anchor.x * next, focal.y - anchor.y * next);
        self.zoom = next;
        self.settle();
    }

    pub fn zoom_by(&mut self, factor: f32, focal: Point) {
        self.zoom_to(self.zoom * factor, focal);
    }

    /// Wheel/trackpad zoom. Only acts when the zoom modifier is held; returns
    /// whether the event was consumed.
    pub fn on_wheel(&mut self, delta_y: f32, focal: Point, zoom_modifier: bool) -> bool {
        if !zoom_modifier || !delta_y.is_finite() {
            return false;
        }
        self.zoom_by((-delta_y * self.wheel_sensitivity).exp(), focal);
        true
    }

    /// Enables one-finger/pointer panning. Ignored while not zoomed in.
    pub fn set_pan_mode(&mut self, enabled: bool) {
        self.pan_mode = enabled && self.zoom > MIN_ZOOM;
        if !self.pan_mode {
            self.gesture.is_panning = false;
            self.gesture.last_pan_point = None;
        }
    }

    pub fn on_gesture_start(&mut self, touches: &[Point]) {
        match touches {
            [p] => self.begin_pan(*p),
            [a, b, ..] => self.begin_pinch(*a, *b),
            [] => {}
        }
    }

    pub fn on_gesture_move(&mut self, touches: &[Point]) {
        match touches {
            [p] => {
                if !self.gesture.is_panning {
                    return;
                }
                if let Some(last) = self.gesture.last_pan_point {
                    self.pan.x += p.x - last.x;
                    self.pan.y += p.y - last.y;
                }
                self.gesture.last_pan_point = Some(*p);
            }
            [a, b, ..] => {
                let (Some(last_distance), Some(last_mid)) = (
                    self.gesture.last_pinch_distance,
                    self.gesture.last_pinch_midpoint,
                ) else {
                    self.begin_pinch(*a, *b);
                    return;
                };
                let distance = a.distance(*b);
                let mid = a.midpoint(*b);

                self.pan.x += mid.x - last_mid.x;
                self.pan.y += mid.y - last_mid.y;
                if last_distance >= MIN_PINCH_DISTANCE && distance >= MIN_PINCH_DISTANCE {
                    self.zoom_to(self.zoom * distance / last_distance, mid);
                } else {
                    self.settle();
                }

                self.gesture.last_pinch_distance = Some(distance);
                self.gesture.last_pinch_midpoint = Some(mid);
            }
            [] => {}
        }
    }

    /// `remaining` are the touches still down after the release.
    pub fn on_gesture_end(&mut self, remaining: &[Point]) {
        self.gesture.last_pinch_distance = None;
        self.gesture.last_pinch_midpoint = None;
        self.gesture.is_panning = false;
        self.gesture.last_pan_point = None;

        match remaining {
            [p] => self.begin_pan(*p),
            [a, b, ..] => self.begin_pinch(*a, *b),
            [] => {}
        }
        if self.zoom <= MIN_ZOOM {
            self.snap_home();
        }
    }

    pub fn reset(&mut self) {
        self.zoom = MIN_ZOOM;
        self.gesture = GestureState::default();
        self.snap_home();
    }

    fn begin_pan(&mut self, p: Point) {
        self.gesture.last_pinch_distance = None;
        self.gesture.last_pinch_midpoint = None;
        self.gesture.is_panning = self.pan_mode && self.zoom > MIN_ZOOM;
        self.gesture.last_pan_point = self.gesture.is_panning.then_some(p);
    }

    fn begin_pinch(&mut self, a: Point, b: Point) {
        self.gesture.is_panning = false;
        self.gesture.last_pan_point = None;
        self.gesture.last_pinch_distance = Some(a.distance(b));
        self.gesture.last_pinch_midpoint = Some(a.midpoint(b));
    }

    fn settle(&mut self) {
        if self.zoom <= MIN_ZOOM {
            self.snap_home();
        }
    }

    fn snap_home(&mut self) {
        self.zoom = MIN_ZOOM;
        self.pan = Point::ORIGIN;
        self.pan_mode = false;
        self.gesture.is_panning = false;
        self.gesture.last_pan_point = None;
    }
}
