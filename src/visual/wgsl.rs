//! Built-in shader sources. `--shader-dir` may override each by file name.
//!
//! `POINTS_SRC` mirrors `physics::displace`; `COMPOSITE_SRC` and `SACRED_SRC`
//! mirror the software chain in `visual::cpu` and the helpers in `post`.

pub const POINTS_FILE: &str = "points.wgsl";
pub const COMPOSITE_FILE: &str = "composite.wgsl";
pub const SACRED_FILE: &str = "sacred.wgsl";

pub const POINTS_SRC: &str = r#"
struct Field {
    view_proj: mat4x4<f32>,
    eye_time: vec4<f32>,
    bands_lo: vec4<f32>,
    bands_hi: vec4<f32>,
    energy: vec4<f32>,
    params: vec4<f32>,
    frame: vec4<f32>,
};

@group(0) @binding(0) var<uniform> field: Field;

struct Instance {
    @location(0) position: vec3<f32>,
    @location(1) color: vec3<f32>,
    @location(2) category: f32,
};

struct VsOut {
    @builtin(position) clip: vec4<f32>,
    @location(0) color: vec3<f32>,
    @location(1) corner: vec2<f32>,
    @location(2) alpha: f32,
};

const SPLAT_WORLD_SIZE: f32 = 0.05;
const MAX_SPLAT_RADIUS: f32 = 6.0;
const PROXIMITY_RANGE: f32 = 12.0;
const PROXIMITY_MASS: f32 = 1.5;

fn band(i: u32) -> f32 {
    if (i < 4u) {
        return field.bands_lo[i];
    }
    return field.bands_hi[i - 4u];
}

fn category_mass(c: u32) -> f32 {
    switch c {
        case 1u: { return 2.4; }
        case 2u: { return 3.0; }
        case 3u: { return 0.8; }
        case 4u: { return 0.35; }
        case 5u: { return 0.6; }
        default: { return 1.0; }
    }
}

fn category_energy(c: u32) -> f32 {
    switch c {
        case 1u: { return max(band(1u), band(2u)); }
        case 2u: { return max(band(0u), band(2u)); }
        case 3u: { return max(band(3u), band(4u)); }
        case 4u: { return max(band(6u), band(7u)); }
        case 5u: { return max(band(4u), band(5u)); }
        default: { return max(band(0u), band(1u)); }
    }
}

fn safe_normalize(p: vec3<f32>) -> vec3<f32> {
    let l = length(p);
    if (l > 0.0) {
        return p / l;
    }
    return vec3<f32>(0.0);
}

fn category_wave(c: u32, p: vec3<f32>, t: f32, e: f32) -> vec3<f32> {
    switch c {
        case 1u: {
            return vec3<f32>(0.0, sin(p.x * 0.5 + t * 1.4), 0.0) * e * 0.3;
        }
        case 2u: {
            return vec3<f32>(sin(p.z * 0.7 + t), 0.0, cos(p.x * 0.7 + t)) * e * 0.25;
        }
        case 3u: {
            return vec3<f32>(sin(p.y * 1.3 + t * 2.3), 0.0, cos(p.y * 1.1 + t * 1.9)) * e * 0.5;
        }
        case 4u: {
            return vec3<f32>(
                sin(p.y * 0.4 + t * 0.7) * 1.2,
                cos(p.x * 0.3 + t * 0.5) * 0.4,
                sin((p.x + p.z) * 0.2 + t * 0.9),
            ) * e * 0.9;
        }
        case 5u: {
            return vec3<f32>(cos(p.z * 0.6 + t), sin(p.x * 0.6 + t * 1.3), sin(p.y * 0.6 + t * 0.8)) * e * 0.7;
        }
        default: {
            return safe_normalize(p) * sin(t * 2.1 + length(p) * 0.8) * e * 0.6;
        }
    }
}

fn position_hash(p: vec3<f32>, salt: f32) -> f32 {
    let h = sin(dot(p, vec3<f32>(12.9898, 78.233, 37.719)) + salt) * 43758.547;
    return h - floor(h);
}

fn field_offset(c: u32, p: vec3<f32>, t: f32, e: f32) -> vec3<f32> {
    let bass = field.energy.x;
    let mid = field.energy.y;
    let high = field.energy.z;
    let beat = field.energy.w;

    let global_wave = vec3<f32>(sin(p.y * 0.9 + t * 1.7), sin(p.z * 0.8 + t * 1.3), sin(p.x * 0.7 + t * 1.1))
        * (bass * 0.4 + mid * 0.3);

    let b1 = band(1u);
    let b5 = band(5u);
    let interference = safe_normalize(p) * sin(p.x * 3.0 * b1 + t) * sin(p.y * 3.0 * b5 - t) * b1 * b5 * 0.8;

    let a = high * 0.6 * sin(t * 0.5 + length(p) * 0.2);
    let s = sin(a);
    let co = cos(a);
    let spiral = vec3<f32>(co * p.x + s * p.z, p.y, -s * p.x + co * p.z) - p;

    let pulse = safe_normalize(p) * beat * 0.5 * (0.5 + 0.5 * sin(length(p) * 1.5 - t * 6.0));

    let jitter = (vec3<f32>(position_hash(p, 0.0), position_hash(p, 1.7), position_hash(p, 3.1)) - vec3<f32>(0.5))
        * 2.0 * field.params.y * 0.35;

    return category_wave(c, p, t, e) + global_wave + interference + spiral + pulse + jitter;
}

@vertex
fn vs_main(@builtin(vertex_index) vi: u32, inst: Instance) -> VsOut {
    var corners = array<vec2<f32>, 6>(
        vec2<f32>(-1.0, -1.0),
        vec2<f32>(1.0, -1.0),
        vec2<f32>(1.0, 1.0),
        vec2<f32>(-1.0, -1.0),
        vec2<f32>(1.0, 1.0),
        vec2<f32>(-1.0, 1.0),
    );
    let corner = corners[vi % 6u];
    let c = u32(clamp(round(inst.category * 5.0), 0.0, 5.0));
    let t = field.eye_time.w;
    let coherence = clamp(field.params.x, 0.0, 1.0);
    let base = inst.position;

    let prox = clamp(1.0 - distance(base, field.eye_time.xyz) / PROXIMITY_RANGE, 0.0, 1.0);
    let mass = category_mass(c) * (1.0 + prox * PROXIMITY_MASS);
    let protect = smoothstep(0.55, 1.0, prox) * 0.7;
    let drive = (1.0 - coherence) * (1.0 - protect);
    let e = category_energy(c);

    var pos = base;
    if (drive > 0.0) {
        pos = base + field_offset(c, base, t, e) * (drive / mass);
    }

    let size = field.params.z * (0.55 + 0.45 * coherence) * (1.0 + 0.8 * e)
        * (0.85 + 0.05 * min(category_mass(c), 3.0));
    let highlight = i32(round(field.params.w));
    var emphasis = 1.0;
    if (highlight >= 0) {
        emphasis = select(0.3, 1.5, u32(highlight) == c);
    }

    var out: VsOut;
    let clip = field.view_proj * vec4<f32>(pos, 1.0);
    let vh = max(field.frame.z, 1.0);
    let w = max(clip.w, 1e-4);
    let radius_ndc = clamp(size * SPLAT_WORLD_SIZE * field.frame.w / w, 1.0 / vh, 2.0 * MAX_SPLAT_RADIUS / vh);
    let offset = vec2<f32>(corner.x * radius_ndc / max(field.frame.y, 1e-3), corner.y * radius_ndc) * clip.w;
    out.clip = vec4<f32>(clip.xy + offset, clip.z, clip.w);
    out.color = inst.color * emphasis * (1.0 + 0.25 * e);
    out.corner = corner;
    out.alpha = field.frame.x;
    return out;
}

@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    if (dot(in.corner, in.corner) > 1.0) {
        discard;
    }
    return vec4<f32>(in.color, in.alpha);
}
"#;

pub const COMPOSITE_SRC: &str = r#"
struct Post {
    // time, kaleido_amount, kaleido_rotation, feedback (pass-scaled)
    a: vec4<f32>,
    // zoom_in, zoom_out, spiral_angle, chroma_offset
    b: vec4<f32>,
    // glitch_amount, glitch_seed (bits), bloom_threshold, bloom_strength
    c: vec4<f32>,
    // hue_shift, sacred_activation, tunnel_amount, beat
    d: vec4<f32>,
    // width, height, aspect, draw_sacred
    e: vec4<f32>,
};

@group(0) @binding(0) var<uniform> post: Post;
@group(0) @binding(1) var src_tex: texture_2d<f32>;
@group(0) @binding(2) var history_tex: texture_2d<f32>;
@group(0) @binding(3) var samp: sampler;

struct FsIn {
    @builtin(position) pos: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

const TAU: f32 = 6.28318530718;
const KALEIDO_SEGMENTS: f32 = 6.0;
const BLOOM_SIGMA: f32 = 1.6;

@vertex
fn vs_main(@builtin(vertex_index) vi: u32) -> FsIn {
    let uv = vec2<f32>(f32((vi << 1u) & 2u), f32(vi & 2u));
    var out: FsIn;
    out.pos = vec4<f32>(uv * vec2<f32>(2.0, -2.0) + vec2<f32>(-1.0, 1.0), 0.0, 1.0);
    out.uv = uv;
    return out;
}

fn modp(a: f32, b: f32) -> f32 {
    return a - b * floor(a / b);
}

fn hash_u32(x: u32, y: u32, seed: u32) -> u32 {
    var n = (x * 374761393u) ^ (y * 668265263u) ^ (seed * 0x9E3779B9u);
    n = n ^ (n >> 13u);
    n = n * 1274126177u;
    return n ^ (n >> 16u);
}

fn hash_unit(x: u32, y: u32, seed: u32) -> f32 {
    return f32(hash_u32(x, y, seed) & 0x00FFFFFFu) / 16777216.0;
}

fn to_u32(v: f32) -> u32 {
    return u32(max(v, 0.0));
}

fn src_at(uv: vec2<f32>) -> vec3<f32> {
    return textureSampleLevel(src_tex, samp, uv, 0.0).rgb;
}

fn history_at(uv: vec2<f32>) -> vec3<f32> {
    return textureSampleLevel(history_tex, samp, uv, 0.0).rgb;
}

fn kaleido_uv(uv: vec2<f32>, rotation: f32) -> vec2<f32> {
    let p = uv - vec2<f32>(0.5);
    let r = length(p);
    let seg = TAU / KALEIDO_SEGMENTS;
    var a = modp(atan2(p.y, p.x) + rotation, seg);
    if (a > seg * 0.5) {
        a = seg - a;
    }
    return vec2<f32>(0.5) + r * vec2<f32>(cos(a), sin(a));
}

fn zoom_uv(uv: vec2<f32>, zoom: f32) -> vec2<f32> {
    return vec2<f32>(0.5) + (uv - vec2<f32>(0.5)) / max(zoom, 1e-3);
}

fn rotate_uv(uv: vec2<f32>, angle: f32) -> vec2<f32> {
    let s = sin(angle);
    let c = cos(angle);
    let p = uv - vec2<f32>(0.5);
    return vec2<f32>(0.5) + vec2<f32>(c * p.x - s * p.y, s * p.x + c * p.y);
}

fn luma(c: vec3<f32>) -> f32 {
    return dot(c, vec3<f32>(0.299, 0.587, 0.114));
}

fn hue_rotate(c: vec3<f32>, angle: f32) -> vec3<f32> {
    let k = vec3<f32>(0.57735026);
    let cs = cos(angle);
    return c * cs + cross(k, c) * sin(angle) + k * dot(k, c) * (1.0 - cs);
}

fn gauss(x: f32) -> f32 {
    return exp(-(x * x) / (2.0 * BLOOM_SIGMA * BLOOM_SIGMA));
}

fn bloom(uv: vec2<f32>) -> vec3<f32> {
    let texel = 1.0 / max(post.e.xy, vec2<f32>(1.0));
    let threshold = post.c.z;
    var acc = vec3<f32>(0.0);
    var norm = 0.0;
    for (var j = -3; j <= 3; j = j + 1) {
        for (var i = -3; i <= 3; i = i + 1) {
            let w = gauss(f32(i)) * gauss(f32(j));
            let c = src_at(uv + vec2<f32>(f32(i), f32(j)) * texel);
            let k = max((luma(c) - threshold) / (1.0 - threshold), 0.0);
            acc = acc + c * k * w;
            norm = norm + w;
        }
    }
    return acc / norm;
}

fn glitch(uv: vec2<f32>, suv: vec2<f32>, col_in: vec3<f32>) -> vec3<f32> {
    let g = post.c.x;
    let seed = bitcast<u32>(post.c.y);
    var col = col_in;
    var guv = suv;

    let row = to_u32(suv.y * 90.0);
    if (hash_unit(row, 0u, seed) < g * 0.3) {
        guv.x = guv.x + (hash_unit(row, 1u, seed) - 0.5) * 0.1 * g;
        col = src_at(guv);
    }

    let bx = to_u32(guv.x * 16.0);
    let by = to_u32(guv.y * 9.0);
    if (hash_unit(bx, by, seed ^ 0xB10Cu) < g * 0.25) {
        let off = vec2<f32>(
            (hash_unit(bx, by, seed + 7u) - 0.5) * 0.08,
            (hash_unit(by, bx, seed + 11u) - 0.5) * 0.08,
        );
        col = src_at(guv + off);
    }

    if (hash_unit(bx, by, seed + 3u) < g * 0.5) {
        let s = 0.01 * g;
        col.r = src_at(guv + vec2<f32>(s, 0.0)).r;
        col.b = src_at(guv - vec2<f32>(s, 0.0)).b;
    }

    let line = to_u32(uv.y * 120.0);
    if (hash_unit(line, 5u, seed) > 1.0 - g * 0.08) {
        let noise = hash_unit(to_u32(uv.x * post.e.x), line, seed);
        col = col + vec3<f32>(0.25 * noise);
    }
    return col;
}

@fragment
fn fs_main(in: FsIn) -> @location(0) vec4<f32> {
    let uv = in.uv;
    var suv = uv;
    if (post.a.y > 0.0) {
        suv = mix(uv, kaleido_uv(uv, post.a.z), post.a.y);
    }
    var col = src_at(suv);

    let chroma = post.b.w;
    if (chroma > 0.0) {
        let d = suv - vec2<f32>(0.5);
        let o = d / max(length(d), 1e-5) * chroma;
        col.r = src_at(suv + o).r;
        col.b = src_at(suv - o).b;
    }

    let feedback = post.a.w;
    if (feedback > 0.0) {
        let fb = history_at(uv) * 0.4
            + history_at(zoom_uv(uv, post.b.x)) * 0.25
            + history_at(zoom_uv(uv, post.b.y)) * 0.2
            + history_at(rotate_uv(uv, post.b.z)) * 0.15;
        col = col + fb * feedback;
    }

    if (post.c.x > 0.0) {
        col = glitch(uv, suv, col);
    }

    col = col + bloom(uv) * post.c.w;
    if (post.d.x != 0.0) {
        col = hue_rotate(col, post.d.x * TAU);
    }
    return vec4<f32>(clamp(col, vec3<f32>(0.0), vec3<f32>(1.0)), 1.0);
}
"#;

pub const SACRED_SRC: &str = r#"
struct Post {
    a: vec4<f32>,
    b: vec4<f32>,
    c: vec4<f32>,
    d: vec4<f32>,
    e: vec4<f32>,
};

@group(0) @binding(0) var<uniform> post: Post;

struct FsIn {
    @builtin(position) pos: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

const TAU: f32 = 6.28318530718;
const SQRT3: f32 = 1.7320508;

@vertex
fn vs_main(@builtin(vertex_index) vi: u32) -> FsIn {
    let uv = vec2<f32>(f32((vi << 1u) & 2u), f32(vi & 2u));
    var out: FsIn;
    out.pos = vec4<f32>(uv * vec2<f32>(2.0, -2.0) + vec2<f32>(-1.0, 1.0), 0.0, 1.0);
    out.uv = uv;
    return out;
}

fn modp(a: f32, b: f32) -> f32 {
    return a - b * floor(a / b);
}

fn line(d: f32, width: f32) -> f32 {
    return 1.0 - smoothstep(0.0, width, abs(d));
}

fn hex_edge(p: vec2<f32>) -> f32 {
    let a = vec2<f32>(modp(p.x, 1.0) - 0.5, modp(p.y, SQRT3) - SQRT3 * 0.5);
    let b = vec2<f32>(modp(p.x - 0.5, 1.0) - 0.5, modp(p.y - SQRT3 * 0.5, SQRT3) - SQRT3 * 0.5);
    let g = abs(select(b, a, dot(a, a) < dot(b, b)));
    let d = max(g.x * 0.5 + g.y * SQRT3 * 0.5, g.x);
    return 0.5 - d;
}

@fragment
fn fs_main(in: FsIn) -> @location(0) vec4<f32> {
    let activation = post.d.y;
    if (activation <= 0.0) {
        return vec4<f32>(0.0);
    }
    let t = post.a.x;
    let x = (in.uv.x - 0.5) * post.e.z * 2.0;
    let y = (in.uv.y - 0.5) * 2.0;
    let r = sqrt(x * x + y * y);
    let ang = atan2(y, x);

    let ring_phase = r * 5.0 - t * 0.25;
    let rings = line(ring_phase - trunc(ring_phase) - 0.5, 0.06) * 0.35;

    let radius = 0.35;
    var flower = line(r - radius, 0.012);
    for (var k = 0; k < 6; k = k + 1) {
        let a = f32(k) * TAU / 6.0 + t * 0.05;
        let d = length(vec2<f32>(x, y) - radius * vec2<f32>(cos(a), sin(a))) - radius;
        flower = max(flower, line(d, 0.012));
    }

    let hex = line(hex_edge(vec2<f32>(x, y) * 4.0), 0.04) * 0.25;

    var tunnel = 0.0;
    let tunnel_amount = post.d.z;
    if (tunnel_amount > 0.0) {
        let z = 0.3 / max(r, 0.05) + t * 0.8;
        tunnel = line(hex_edge(vec2<f32>(ang * 6.0 / TAU * 3.0, z)), 0.05) * smoothstep(0.05, 0.6, r) * tunnel_amount * 0.7;
    }

    let intensity = (rings + flower * 0.6 + hex + tunnel) * activation * (0.6 + 0.4 * post.d.w);
    let phase = t * 0.1 + r * 0.5;
    let rgb = intensity * (vec3<f32>(0.5) + 0.5 * cos(TAU * (vec3<f32>(phase) + vec3<f32>(0.0, 0.33, 0.67))));
    return vec4<f32>(rgb, 1.0);
}
"#;
