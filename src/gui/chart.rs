use std::collections::VecDeque;

use iced::mouse::Cursor;
use iced::widget::canvas::{self, Cache, Canvas, Frame, Geometry, Path, Stroke};
use iced::{Element, Length, Point, Rectangle, Renderer, Theme};

use crate::telemetry::TelemetrySample;

const CHART_HEIGHT: f32 = 160.0;

/// The scrolling rate chart surface. Consumed through two operations only:
/// `request_redraw` after the series changed and `view` to render it; the
/// series itself stays owned by the telemetry accumulator.
pub struct RateChart {
    cache: Cache,
    window_ms: u64,
}

impl RateChart {
    pub fn new(window_ms: u64) -> Self {
        RateChart {
            cache: Cache::new(),
            window_ms,
        }
    }

    pub fn set_window_ms(&mut self, window_ms: u64) {
        self.window_ms = window_ms;
        self.cache.clear();
    }

    pub fn request_redraw(&self) {
        self.cache.clear();
    }

    pub fn view<'a, Message: 'a>(
        &'a self,
        series: &'a VecDeque<TelemetrySample>,
    ) -> Element<'a, Message> {
        Canvas::new(ChartProgram { chart: self, series })
            .width(Length::Fill)
            .height(Length::Fixed(CHART_HEIGHT))
            .into()
    }
}

struct ChartProgram<'a> {
    chart: &'a RateChart,
    series: &'a VecDeque<TelemetrySample>,
}

impl<'a, Message> canvas::Program<Message> for ChartProgram<'a> {
    type State = ();

    fn draw(
        &self,
        _state: &Self::State,
        renderer: &Renderer,
        theme: &Theme,
        bounds: Rectangle,
        _cursor: Cursor,
    ) -> Vec<Geometry> {
        let geometry = self.chart.cache.draw(renderer, bounds.size(), |frame| {
            draw_series(frame, self.series, self.chart.window_ms, theme);
        });

        vec![geometry]
    }
}

fn draw_series(frame: &mut Frame, series: &VecDeque<TelemetrySample>, window_ms: u64, theme: &Theme) {
    let palette = theme.extended_palette();
    let width = frame.width();
    let height = frame.height();

    // baseline
    let baseline = Path::line(Point::new(0.0, height - 1.0), Point::new(width, height - 1.0));
    frame.stroke(
        &baseline,
        Stroke::default().with_width(1.0).with_color(palette.background.strong.color),
    );

    let newest = match series.back() {
        Some(sample) => sample.timestamp_ms,
        None => return,
    };
    let left_edge = newest.saturating_sub(window_ms);

    let max_value = series
        .iter()
        .map(|sample| sample.value)
        .fold(1.0_f64, f64::max);

    let to_point = |sample: &TelemetrySample| -> Point {
        let x = (sample.timestamp_ms - left_edge) as f32 / window_ms as f32 * width;
        // leave a little headroom above the highest point
        let y = height - (sample.value / (max_value * 1.1)) as f32 * height;
        Point::new(x, y)
    };

    let line = Path::new(|builder| {
        let mut samples = series.iter();
        if let Some(first) = samples.next() {
            builder.move_to(to_point(first));
        }
        for sample in samples {
            builder.line_to(to_point(sample));
        }
    });

    frame.stroke(
        &line,
        Stroke::default().with_width(2.0).with_color(palette.primary.base.color),
    );
}
