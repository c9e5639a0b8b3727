use shared::{PlatformDescriptor, WORLD_HEIGHT, WORLD_WIDTH};

/// Position or velocity in world pixels. `y` grows downward, so gravity is +y.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector2 {
    pub x: f32,
    pub y: f32,
}

impl Vector2 {
    pub fn new(x: f32, y: f32) -> Self {
        Vector2 { x, y }
    }

    /// Speed when used as a velocity, reach when used as an offset.
    pub fn magnitude(&self) -> f32 {
        self.x.hypot(self.y)
    }

    /// Heading toward a target; a zero offset gives no heading at all.
    pub fn normalize(&self) -> Vector2 {
        match self.magnitude() {
            len if len > 0.0 => self.scale(len.recip()),
            _ => Vector2::default(),
        }
    }

    pub fn scale(&self, factor: f32) -> Vector2 {
        Vector2::new(self.x * factor, self.y * factor)
    }

    /// Offsets a spawn point, e.g. a projectile leaving the boss center.
    pub fn add(&self, offset: &Vector2) -> Vector2 {
        Vector2::new(self.x + offset.x, self.y + offset.y)
    }

    /// Offset from `origin` to this point.
    pub fn sub(&self, origin: &Vector2) -> Vector2 {
        Vector2::new(self.x - origin.x, self.y - origin.y)
    }

    pub fn distance(&self, other: &Vector2) -> f32 {
        self.sub(other).magnitude()
    }

    /// False once a bad update has pushed NaN or infinity into the entity.
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

///Axis-aligned rectangle anchored at its top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Rect {
            x,
            y,
            width,
            height,
        }
    }

    pub fn left(&self) -> f32 {
        self.x
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn top(&self) -> f32 {
        self.y
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn center(&self) -> Vector2 {
        Vector2::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    ///Strict AABB intersection. Touching edges do not count.
    pub fn intersects(&self, other: &Rect) -> bool {
        !(self.right() <= other.left()
            || self.left() >= other.right()
            || self.bottom() <= other.top()
            || self.top() >= other.bottom())
    }
}

///Static level geometry resolved from a map document.
#[derive(Debug, Clone, PartialEq)]
pub struct Platform {
    pub rect: Rect,
    pub kind: String,
}

impl Platform {
    pub fn from_descriptor(descriptor: &PlatformDescriptor) -> Self {
        Platform {
            rect: Rect::new(
                descriptor.x.resolve(),
                descriptor.y.resolve(),
                descriptor.width.resolve(),
                descriptor.height.resolve(),
            ),
            kind: descriptor
                .kind
                .clone()
                .unwrap_or_else(|| "platform".to_string()),
        }
    }
}

///Which sides of a body touched something during resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Contacts {
    pub landed: bool,
    pub ceiling: bool,
    pub wall: bool,
}

///Which world edges a body was pushed back from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Edges {
    pub left: bool,
    pub right: bool,
    pub top: bool,
    pub bottom: bool,
}

impl Edges {
    pub fn horizontal(&self) -> bool {
        self.left || self.right
    }

    pub fn any(&self) -> bool {
        self.left || self.right || self.top || self.bottom
    }
}

///A moving rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Body {
    pub bounds: Rect,
    pub velocity: Vector2,
    pub grounded: bool,
}

impl Body {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Body {
            bounds: Rect::new(x, y, width, height),
            velocity: Vector2::default(),
            grounded: false,
        }
    }

    pub fn position(&self) -> Vector2 {
        Vector2::new(self.bounds.x, self.bounds.y)
    }

    pub fn center(&self) -> Vector2 {
        self.bounds.center()
    }

    ///Moves the body by its velocity multiplied by `scale`.
    pub fn advance(&mut self, scale: f32) {
        self.bounds.x += self.velocity.x * scale;
        self.bounds.y += self.velocity.y * scale;
    }

    ///Resolves overlaps with every platform, pushing out along the shallower axis.
    pub fn resolve_collisions(&mut self, platforms: &[Platform]) -> Contacts {
        let mut contacts = Contacts::default();

        for platform in platforms {
            let other = &platform.rect;
            if !self.bounds.intersects(other) {
                continue;
            }

            let overlap_x = self.bounds.right().min(other.right()) - self.bounds.left().max(other.left());
            let overlap_y = self.bounds.bottom().min(other.bottom()) - self.bounds.top().max(other.top());
            let center = self.bounds.center();
            let other_center = other.center();

            if overlap_x < overlap_y {
                // Horizontal collision
                if center.x < other_center.x {
                    self.bounds.x = other.left() - self.bounds.width;
                } else {
                    self.bounds.x = other.right();
                }
                self.velocity.x = 0.0;
                contacts.wall = true;
            } else if center.y < other_center.y {
                // Landed on top
                self.bounds.y = other.top() - self.bounds.height;
                if self.velocity.y > 0.0 {
                    self.velocity.y = 0.0;
                }
                contacts.landed = true;
            } else {
                // Hit from below
                self.bounds.y = other.bottom();
                if self.velocity.y < 0.0 {
                    self.velocity.y = 0.0;
                }
                contacts.ceiling = true;
            }
        }

        if contacts.landed {
            self.grounded = true;
        }
        contacts
    }

    ///Keeps the body inside the world rectangle.
    ///
    ///Bouncing bodies reflect their velocity off the edge; others stop and,
    ///on the floor, become grounded.
    pub fn clamp_to_world(&mut self, bounce: bool) -> Edges {
        let mut edges = Edges::default();
        let max_x = (WORLD_WIDTH - self.bounds.width).max(0.0);
        let max_y = (WORLD_HEIGHT - self.bounds.height).max(0.0);

        if self.bounds.x < 0.0 {
            self.bounds.x = 0.0;
            edges.left = true;
            self.velocity.x = if bounce { self.velocity.x.abs() } else { 0.0 };
        } else if self.bounds.x > max_x {
            self.bounds.x = max_x;
            edges.right = true;
            self.velocity.x = if bounce { -self.velocity.x.abs() } else { 0.0 };
        }

        if self.bounds.y < 0.0 {
            self.bounds.y = 0.0;
            edges.top = true;
            self.velocity.y = if bounce { self.velocity.y.abs() } else { self.velocity.y.max(0.0) };
        } else if self.bounds.y > max_y {
            self.bounds.y = max_y;
            edges.bottom = true;
            if bounce {
                self.velocity.y = -self.velocity.y.abs();
            } else {
                self.velocity.y = self.velocity.y.min(0.0);
                self.grounded = true;
            }
        }

        edges
    }
}
